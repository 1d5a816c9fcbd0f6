pub mod fixtures;
pub mod lifecycle;
pub mod scenarios;
pub mod session;
