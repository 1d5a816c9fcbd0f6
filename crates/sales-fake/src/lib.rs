//! sales-fake: in-memory stand-in for the sales API, speaking the same
//! request/response contract as the real server.

pub mod memory;

pub use memory::{InMemorySalesServer, InMemorySalesServerBuilder, DEMO_EMAIL, DEMO_PASSWORD};
