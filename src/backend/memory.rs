//! In-memory backend.
//!
//! Objects and in-flight multi-part uploads are held in
//! `tokio::sync::RwLock<HashMap<...>>` maps.  Used by the engine tests and
//! for local runs without credentials.
//!
//! The store also carries a few injection knobs (listing page size,
//! per-part completion holds, per-batch delete failures).  All of them are
//! no-ops unless a test arms them; the engine never sees them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};
use tokio::sync::RwLock;

use super::store::{ListPage, ObjectStore, StoreFuture};
use crate::errors::TransferError;

/// One pending multi-part upload: part number -> (tag, data).
type PendingUpload = HashMap<u32, (String, Bytes)>;

/// In-memory [`ObjectStore`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    /// Object data keyed by `bucket/key`.
    objects: RwLock<HashMap<String, Bytes>>,
    /// Open multi-part uploads keyed by upload id.
    uploads: RwLock<HashMap<String, PendingUpload>>,

    /// Keys per listing page (0 = everything on one page).
    list_page_size: AtomicUsize,
    /// Part numbers to hold before acknowledging, forcing completion order.
    part_holds: Mutex<HashMap<u32, Duration>>,
    /// Part numbers whose upload should fail.
    failing_parts: Mutex<HashSet<u32>>,
    /// Zero-based delete batch indices that should fail.
    failing_delete_batches: Mutex<HashSet<usize>>,
    /// Sizes of the delete batches received, in order.
    delete_batch_sizes: Mutex<Vec<usize>>,
    delete_batch_seq: AtomicUsize,
    /// `(upload_id, parts)` arguments of every complete_multipart call.
    completions: Mutex<Vec<(String, Vec<(u32, String)>)>>,
}

fn object_key(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}

/// Quoted MD5-hex tag for a byte slice.
fn compute_tag(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, bypassing the engine.
    pub async fn insert_object(&self, bucket: &str, key: &str, data: Bytes) {
        self.objects
            .write()
            .await
            .insert(object_key(bucket, key), data);
    }

    /// Fetch an object directly, bypassing the engine.
    pub async fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects.read().await.get(&object_key(bucket, key)).cloned()
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn open_upload_count(&self) -> usize {
        self.uploads.read().await.len()
    }

    // -- Injection knobs -----------------------------------------------------

    /// Cap listing pages at `n` keys.
    pub fn set_list_page_size(&self, n: usize) {
        self.list_page_size.store(n, Ordering::Relaxed);
    }

    /// Delay acknowledgement of `part_number` by `hold`.
    pub fn hold_part(&self, part_number: u32, hold: Duration) {
        self.part_holds.lock().unwrap().insert(part_number, hold);
    }

    /// Make the upload of `part_number` fail.
    pub fn fail_part(&self, part_number: u32) {
        self.failing_parts.lock().unwrap().insert(part_number);
    }

    /// Make the `index`-th delete batch (zero-based) fail.
    pub fn fail_delete_batch(&self, index: usize) {
        self.failing_delete_batches.lock().unwrap().insert(index);
    }

    /// Sizes of the delete batches received so far, in arrival order.
    pub fn delete_batch_sizes(&self) -> Vec<usize> {
        self.delete_batch_sizes.lock().unwrap().clone()
    }

    /// Recorded `complete_multipart` calls.
    pub fn completions(&self) -> Vec<(String, Vec<(u32, String)>)> {
        self.completions.lock().unwrap().clone()
    }
}

impl ObjectStore for MemoryStore {
    fn head_object(&self, bucket: &str, key: &str) -> StoreFuture<'_, u64> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            match objects.get(&object_key(&bucket, &key)) {
                Some(data) => Ok(data.len() as u64),
                None => Err(TransferError::NotFound { bucket, key }),
            }
        })
    }

    fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> StoreFuture<'_, ()> {
        let full_key = object_key(bucket, key);
        Box::pin(async move {
            self.objects.write().await.insert(full_key, data);
            Ok(())
        })
    }

    fn create_multipart(&self, bucket: &str, key: &str) -> StoreFuture<'_, String> {
        let full_key = object_key(bucket, key);
        Box::pin(async move {
            let upload_id = format!("{full_key}:{}", uuid::Uuid::new_v4());
            self.uploads
                .write()
                .await
                .insert(upload_id.clone(), HashMap::new());
            Ok(upload_id)
        })
    }

    fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StoreFuture<'_, String> {
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            let hold = self.part_holds.lock().unwrap().get(&part_number).copied();
            if let Some(hold) = hold {
                tokio::time::sleep(hold).await;
            }
            if self.failing_parts.lock().unwrap().contains(&part_number) {
                return Err(TransferError::backend(
                    "upload_part",
                    format!("injected failure for part {part_number}"),
                ));
            }

            let tag = compute_tag(&data);
            let mut uploads = self.uploads.write().await;
            let upload = uploads.get_mut(&upload_id).ok_or_else(|| {
                TransferError::backend("upload_part", format!("no such upload {upload_id}"))
            })?;
            upload.insert(part_number, (tag.clone(), data));
            Ok(tag)
        })
    }

    fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<(u32, String)>,
    ) -> StoreFuture<'_, ()> {
        let full_key = object_key(bucket, key);
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            self.completions
                .lock()
                .unwrap()
                .push((upload_id.clone(), parts.clone()));

            let mut uploads = self.uploads.write().await;
            let upload = uploads.remove(&upload_id).ok_or_else(|| {
                TransferError::backend("complete_multipart", format!("no such upload {upload_id}"))
            })?;

            let mut assembled = BytesMut::new();
            let mut last_number = 0u32;
            for (part_number, tag) in &parts {
                if *part_number <= last_number {
                    return Err(TransferError::backend(
                        "complete_multipart",
                        "parts not in ascending part-number order",
                    ));
                }
                last_number = *part_number;
                let (stored_tag, data) = upload.get(part_number).ok_or_else(|| {
                    TransferError::backend(
                        "complete_multipart",
                        format!("missing part {part_number}"),
                    )
                })?;
                if stored_tag != tag {
                    return Err(TransferError::backend(
                        "complete_multipart",
                        format!("tag mismatch for part {part_number}"),
                    ));
                }
                assembled.extend_from_slice(data);
            }

            drop(uploads);
            self.objects
                .write()
                .await
                .insert(full_key, assembled.freeze());
            Ok(())
        })
    }

    fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        start: u64,
        end: u64,
    ) -> StoreFuture<'_, Bytes> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            let data = objects
                .get(&object_key(&bucket, &key))
                .ok_or(TransferError::NotFound { bucket, key })?;
            if end < start || end >= data.len() as u64 {
                return Err(TransferError::backend(
                    "get_object_range",
                    format!("range {start}-{end} outside object of {} bytes", data.len()),
                ));
            }
            Ok(data.slice(start as usize..=end as usize))
        })
    }

    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
    ) -> StoreFuture<'_, ListPage> {
        let bucket_prefix = format!("{bucket}/");
        let match_prefix = format!("{bucket_prefix}{prefix}");
        Box::pin(async move {
            let objects = self.objects.read().await;
            let mut keys: Vec<String> = objects
                .keys()
                .filter(|k| k.starts_with(&match_prefix))
                .map(|k| k[bucket_prefix.len()..].to_string())
                .collect();
            keys.sort();

            let offset: usize = match token {
                Some(t) => t
                    .parse()
                    .map_err(|_| TransferError::backend("list_objects", "bad continuation token"))?,
                None => 0,
            };
            let page_size = match self.list_page_size.load(Ordering::Relaxed) {
                0 => keys.len().max(1),
                n => n,
            };

            let page: Vec<String> = keys.iter().skip(offset).take(page_size).cloned().collect();
            let next = offset + page.len();
            let next_token = (next < keys.len()).then(|| next.to_string());
            Ok(ListPage {
                keys: page,
                next_token,
            })
        })
    }

    fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> StoreFuture<'_, ()> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let batch = self.delete_batch_seq.fetch_add(1, Ordering::Relaxed);
            self.delete_batch_sizes.lock().unwrap().push(keys.len());
            if self.failing_delete_batches.lock().unwrap().contains(&batch) {
                return Err(TransferError::backend(
                    "delete_objects",
                    format!("injected failure for batch {batch}"),
                ));
            }

            // Deleting a missing key is not an error; batch deletes are
            // idempotent.
            let mut objects = self.objects.write().await;
            for key in &keys {
                objects.remove(&object_key(&bucket, key));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_head_roundtrip() {
        let store = MemoryStore::new();
        store
            .put_object("b", "k", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(store.head_object("b", "k").await.unwrap(), 5);
        assert!(store.head_object("b", "other").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn multipart_assembles_in_part_order() {
        let store = MemoryStore::new();
        let upload_id = store.create_multipart("b", "k").await.unwrap();
        let t2 = store
            .upload_part("b", "k", &upload_id, 2, Bytes::from_static(b"world"))
            .await
            .unwrap();
        let t1 = store
            .upload_part("b", "k", &upload_id, 1, Bytes::from_static(b"hello "))
            .await
            .unwrap();
        store
            .complete_multipart("b", "k", &upload_id, vec![(1, t1), (2, t2)])
            .await
            .unwrap();
        assert_eq!(store.object("b", "k").await.unwrap(), Bytes::from_static(b"hello world"));
        assert_eq!(store.open_upload_count().await, 0);
    }

    #[tokio::test]
    async fn complete_rejects_descending_part_order() {
        let store = MemoryStore::new();
        let upload_id = store.create_multipart("b", "k").await.unwrap();
        let t1 = store
            .upload_part("b", "k", &upload_id, 1, Bytes::from_static(b"a"))
            .await
            .unwrap();
        let t2 = store
            .upload_part("b", "k", &upload_id, 2, Bytes::from_static(b"b"))
            .await
            .unwrap();
        let err = store
            .complete_multipart("b", "k", &upload_id, vec![(2, t2), (1, t1)])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ascending"));
    }

    #[tokio::test]
    async fn range_reads_are_inclusive() {
        let store = MemoryStore::new();
        store.insert_object("b", "k", Bytes::from_static(b"0123456789")).await;
        let chunk = store.get_object_range("b", "k", 3, 6).await.unwrap();
        assert_eq!(chunk, Bytes::from_static(b"3456"));
        assert!(store.get_object_range("b", "k", 5, 10).await.is_err());
    }

    #[tokio::test]
    async fn listing_pages_with_tokens() {
        let store = MemoryStore::new();
        for name in ["dir/a", "dir/b", "dir/c", "other/x"] {
            store.insert_object("b", name, Bytes::new()).await;
        }
        store.set_list_page_size(2);

        let first = store.list_objects("b", "dir", None).await.unwrap();
        assert_eq!(first.keys, vec!["dir/a", "dir/b"]);
        let token = first.next_token.expect("more pages");

        let second = store.list_objects("b", "dir", Some(token)).await.unwrap();
        assert_eq!(second.keys, vec!["dir/c"]);
        assert!(second.next_token.is_none());
    }
}
