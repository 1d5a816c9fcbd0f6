//! sales-types: document and fixture types plus the transport port shared by the smoke-test crates

pub mod domain;
pub mod ports;
