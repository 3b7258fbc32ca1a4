//! Backend operations consumed by the transfer engine.
//!
//! The [`store::ObjectStore`] trait abstracts the remote bucket/object
//! service.  Implementations: the AWS S3 SDK and an in-memory store used
//! by tests and local runs.

pub mod aws;
pub mod memory;
pub mod store;
