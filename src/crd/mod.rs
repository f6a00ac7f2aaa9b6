//! Custom Resource Definitions for tenant filesystems
//!
//! This module contains both downstream storage kinds:
//! - StandardStorage: parallel filesystem backend
//! - GeneralPurposeStorage: NFS backend with network allow-lists

pub mod general_purpose_storage;
pub mod standard_storage;
pub mod types;

pub use general_purpose_storage::*;
pub use standard_storage::*;
pub use types::*;
