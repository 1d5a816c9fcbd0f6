pub mod amount;
pub mod document;
pub mod fixture;
pub mod tenant;
