//! Adapters - concrete implementations of the domain ports
//!
//! - Kubernetes and in-memory object stores
//! - HTTP and in-memory request services

pub mod http_requests;
pub mod kube_store;
pub mod memory_requests;
pub mod memory_store;

pub use http_requests::{HttpRequestService, NdjsonDecoder};
pub use kube_store::KubeObjectStore;
pub use memory_requests::MemoryRequestService;
pub use memory_store::MemoryObjectStore;
