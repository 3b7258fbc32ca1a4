//! Abstract backend operations trait.
//!
//! The engine drives everything through [`ObjectStore`], so the concrete
//! wire protocol (REST verbs, signing, payload encoding) stays out of the
//! transfer state machines.  The trait-object boundary is also where a
//! retry or deadline decorator would slot in; none ships by default.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;

use crate::errors::TransferError;

/// Future type returned by every backend operation.
pub type StoreFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransferError>> + Send + 'a>>;

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct ListPage {
    /// Keys on this page, as stored (prefix not stripped).
    pub keys: Vec<String>,
    /// Continuation token when more pages remain.
    pub next_token: Option<String>,
}

/// Async bucket/object backend contract.
pub trait ObjectStore: Send + Sync + 'static {
    /// Size of the object in bytes, or [`TransferError::NotFound`].
    fn head_object(&self, bucket: &str, key: &str) -> StoreFuture<'_, u64>;

    /// Write a whole object in one request.
    fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> StoreFuture<'_, ()>;

    /// Start a multi-part transfer, returning its upload id.
    fn create_multipart(&self, bucket: &str, key: &str) -> StoreFuture<'_, String>;

    /// Upload one part (1-indexed), returning its completion tag.
    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StoreFuture<'_, String>;

    /// Finish a multi-part transfer.  `parts` must be in ascending
    /// part-number order.
    fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<(u32, String)>,
    ) -> StoreFuture<'_, ()>;

    /// Read the inclusive byte range `[start, end]` of an object.
    fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> StoreFuture<'_, Bytes>;

    /// List keys under `prefix`, resuming from `token` when present.
    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> StoreFuture<'_, ListPage>;

    /// Delete a batch of keys.  Callers keep batches within the backend's
    /// per-request limit.
    fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> StoreFuture<'_, ()>;
}
