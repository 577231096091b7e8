//! Counter maintenance
//!
//! The [`CounterService`] seeds the counter record once, then runs a writer
//! that increments it and readers that observe it under their configured
//! read targets. Every tick outcome is published as a domain event; no tick
//! failure stops the service.

mod service;
mod tasks;

pub use service::{CounterService, ServiceState};
