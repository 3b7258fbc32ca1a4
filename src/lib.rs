//! partstream library — concurrent multi-part object transfers.
//!
//! This crate provides the core components for moving large objects to
//! and from an S3-compatible store: a segment planner that splits payloads
//! into bounded parts, a transfer registry tracking multi-part upload
//! lifecycles, resumable work items for asynchronous operation, and
//! pluggable object-store backends.

pub mod backend;
pub mod config;
pub mod engine;
pub mod errors;
pub mod goal;
pub mod metrics;
pub mod registry;
pub mod segment;
pub mod work;

pub use backend::aws::AwsStore;
pub use backend::memory::MemoryStore;
pub use backend::store::ObjectStore;
pub use config::TransferConfig;
pub use engine::TransferEngine;
pub use errors::TransferError;
pub use registry::TransferStage;
pub use work::WorkItem;
