//! sales-harness: workflow verification for the sales API (session, fixtures,
//! document lifecycles, console reporting)

pub mod config;
pub mod errors;
pub mod reporter;

pub mod application;

pub use sales_types::{domain, ports};
