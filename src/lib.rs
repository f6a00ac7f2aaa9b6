//! Filesystem Replicator
//!
//! Replicates tenant filesystem requests from the request service into
//! Kubernetes storage resources, and feeds the provisioning status of those
//! resources back to the request service.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   search (NDJSON)   ┌──────────────────────────┐
//! │                      │ ──────────────────▶ │  WatermarkPoller         │
//! │   Request Service    │                     │   └─ RequestDispatcher   │
//! │                      │ ◀── finalizer ───── │       └─ RetryExecutor   │
//! │                      │                     └────────────┬─────────────┘
//! │                      │                                  │ create/update/delete
//! │                      │                     ┌────────────▼─────────────┐
//! │                      │ ◀── status ──────── │  StatusWatcher (per kind)│
//! └──────────────────────┘                     └────────────▲─────────────┘
//!                                                           │ watch
//!                                              ┌────────────┴─────────────┐
//!                                              │  Object Store (CRDs)     │
//!                                              │  StandardStorage         │
//!                                              │  GeneralPurposeStorage   │
//!                                              └──────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`replicator`]: Poller, dispatcher, status watchers and their helpers
//! - [`adapters`]: Kubernetes, HTTP and in-memory implementations of the ports
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Request model and port traits
//! - [`server`]: Health, readiness and metrics endpoints
//! - [`error`]: Error types and handling

pub mod adapters;
pub mod crd;
pub mod domain;
pub mod error;
pub mod replicator;
pub mod server;

// Re-export commonly used types
pub use adapters::{HttpRequestService, KubeObjectStore, MemoryObjectStore, MemoryRequestService};

pub use crd::{
    FilesystemPhase, GeneralPurposeStorage, GeneralPurposeStorageSpec, IpFilter, StandardStorage,
    StandardStorageSpec,
};

pub use domain::ports::{
    ChangeEvent, ObjectStore, ObjectStoreRef, RequestService, RequestServiceRef, StatusUpdate,
    StorageKind, StorageResource,
};
pub use domain::request::{FilesystemRequest, RequestAction};

pub use error::{Error, Result, StoreError, StoreResult};

pub use replicator::{
    FinalizerReleaser, IpFilterPolicy, ReplicatorConfig, ReplicatorMetrics, RequestDispatcher,
    RetryExecutor, StatusWatcher, WatermarkPoller,
};

pub use server::{run_ops_server, Readiness};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
