//! Domain layer - request model and port definitions
//!
//! This module defines the requests the replicator consumes and the traits
//! (ports) that adapters implement, following hexagonal architecture principles.

pub mod ports;
pub mod request;

pub use ports::*;
pub use request::*;
