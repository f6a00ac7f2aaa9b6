//! Replication Controller
//!
//! The two replication paths between the request service and the object
//! store, and the building blocks they share:
//! - write path: [`WatermarkPoller`] → [`RequestDispatcher`] → object store
//! - status path: object store → [`StatusWatcher`] → request service

pub mod capacity;
pub mod cidr;
pub mod config;
pub mod dispatcher;
pub mod finalizer;
pub mod materializer;
pub mod metrics;
pub mod poller;
pub mod retry;
pub mod watcher;

pub use config::{IpFilterPolicy, ReplicatorConfig, RetrySettings};
pub use dispatcher::{DispatchOutcome, RequestDispatcher};
pub use finalizer::FinalizerReleaser;
pub use materializer::UpdatePlan;
pub use metrics::ReplicatorMetrics;
pub use poller::{CycleReport, WatermarkPoller};
pub use retry::{Outcome, RetryExecutor, WriteOp};
pub use watcher::{StatusFingerprint, StatusWatcher, WatchOutcome};
