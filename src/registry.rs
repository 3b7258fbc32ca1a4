//! Registry of in-flight multi-part transfers.
//!
//! One entry per (bucket, object) key, holding the stage machine, the
//! planned segments, the caller's payload, and per-part completion tags.
//! All mutation happens under one registry-wide lock; cross-task
//! completion signaling goes through a single notifier, the analog of a
//! condition variable.
//!
//! Stage transitions are a protocol: violating them (for example starting
//! a second transfer for a key whose previous transfer has not finished)
//! is a logic defect in the caller and panics rather than returning an
//! error.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::{oneshot, Notify};

use crate::errors::TransferError;
use crate::segment::Segment;

/// Lifecycle stage of one multi-part transfer.
///
/// `Ready` is both initial and terminal: a finished transfer resets to
/// `Ready` so the same key can be reused later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    Ready,
    CreatePending,
    Active,
    CompletionPending,
}

/// Pending outcome of the backend "create multipart transfer" call.
pub type CreateReceiver = oneshot::Receiver<Result<String, TransferError>>;
/// Pending outcome of the backend "complete multipart transfer" call.
pub type CompleteReceiver = oneshot::Receiver<Result<(), TransferError>>;

#[derive(Default)]
struct TransferEntry {
    stage: Option<TransferStage>,
    parts: Vec<Segment>,
    data: Bytes,
    upload_id: String,
    part_tags: Vec<String>,
    completed: u64,
    first_error: Option<TransferError>,
    create_rx: Option<CreateReceiver>,
    complete_rx: Option<CompleteReceiver>,
}

impl TransferEntry {
    fn stage(&self) -> TransferStage {
        self.stage.unwrap_or(TransferStage::Ready)
    }
}

/// Lock-protected table of in-flight multi-part transfer state.
#[derive(Default)]
pub struct TransferRegistry {
    entries: Mutex<HashMap<String, TransferEntry>>,
    notify: Notify,
}

fn registry_key(bucket: &str, object: &str) -> String {
    format!("{bucket}/{object}")
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a multi-part transfer for this key.
    ///
    /// Panics if the key already has a transfer in a non-`Ready` stage.
    /// Stores the planned segments and payload, clears tags and counts,
    /// parks the pending create outcome, and moves to `CreatePending`.
    pub fn begin(
        &self,
        bucket: &str,
        object: &str,
        parts: Vec<Segment>,
        data: Bytes,
        create_rx: CreateReceiver,
    ) {
        let key = registry_key(bucket, object);
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key.clone()).or_default();
        assert!(
            entry.stage() == TransferStage::Ready,
            "{key}: begin before previous transfer finished, stage is {:?}",
            entry.stage(),
        );
        let tag_count = parts.len();
        *entry = TransferEntry {
            stage: Some(TransferStage::CreatePending),
            parts,
            data,
            upload_id: String::new(),
            part_tags: vec![String::new(); tag_count],
            completed: 0,
            first_error: None,
            create_rx: Some(create_rx),
            complete_rx: None,
        };
    }

    /// Transition the entry from `from` to `to`.  Panics if the current
    /// stage is not `from` or the entry is missing.
    pub fn advance(&self, bucket: &str, object: &str, from: TransferStage, to: TransferStage) {
        let key = registry_key(bucket, object);
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&key)
            .unwrap_or_else(|| panic!("{key}: advance but no transfer in registry"));
        assert!(
            entry.stage() == from,
            "{key}: advance from {from:?} but stage is {:?}",
            entry.stage(),
        );
        entry.stage = Some(to);
    }

    /// Current stage for a key (`Ready` when the key has never been seen).
    pub fn stage(&self, bucket: &str, object: &str) -> TransferStage {
        let entries = self.entries.lock().unwrap();
        entries
            .get(&registry_key(bucket, object))
            .map(|e| e.stage())
            .unwrap_or(TransferStage::Ready)
    }

    /// Take the pending create outcome along with the planned segments and
    /// payload, for the stage that issues the part uploads.
    pub fn upload_plan(
        &self,
        bucket: &str,
        object: &str,
    ) -> (CreateReceiver, Vec<Segment>, Bytes) {
        let key = registry_key(bucket, object);
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&key)
            .unwrap_or_else(|| panic!("{key}: upload_plan but no transfer in registry"));
        let rx = entry
            .create_rx
            .take()
            .unwrap_or_else(|| panic!("{key}: create outcome already taken"));
        (rx, entry.parts.clone(), entry.data.clone())
    }

    /// Record the upload id returned by the backend.
    pub fn set_upload_id(&self, bucket: &str, object: &str, upload_id: String) {
        let key = registry_key(bucket, object);
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&key)
            .unwrap_or_else(|| panic!("{key}: set_upload_id but no transfer in registry"));
        entry.upload_id = upload_id;
    }

    /// Record the completion tag for one part and wake the waiter.
    ///
    /// `part_index` is zero-based; completions may land in any order.
    pub fn record_part_tag(&self, bucket: &str, object: &str, part_index: usize, tag: String) {
        let key = registry_key(bucket, object);
        {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries
                .get_mut(&key)
                .unwrap_or_else(|| panic!("{key}: part completion but no transfer in registry"));
            assert!(
                entry.stage() == TransferStage::Active,
                "{key}: part completion but stage is {:?}",
                entry.stage(),
            );
            entry.part_tags[part_index] = tag;
            entry.completed += 1;
            tracing::debug!(
                "{key}: part {} done, {}/{} finished",
                part_index + 1,
                entry.completed,
                entry.parts.len()
            );
        }
        self.notify.notify_waiters();
    }

    /// Record a failed part.  The first error is kept and surfaced from
    /// [`wait_parts`](Self::wait_parts); the completion count still
    /// advances so the waiter wakes once every part has reported.
    pub fn record_part_failure(&self, bucket: &str, object: &str, err: TransferError) {
        let key = registry_key(bucket, object);
        {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries
                .get_mut(&key)
                .unwrap_or_else(|| panic!("{key}: part failure but no transfer in registry"));
            if entry.first_error.is_none() {
                entry.first_error = Some(err);
            }
            entry.completed += 1;
        }
        self.notify.notify_waiters();
    }

    /// Wait until every part has reported, then return the upload id and
    /// the tags in ascending part-number order (1-indexed), or the first
    /// recorded part error.
    pub async fn wait_parts(
        &self,
        bucket: &str,
        object: &str,
    ) -> Result<(String, Vec<(u32, String)>), TransferError> {
        let key = registry_key(bucket, object);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut entries = self.entries.lock().unwrap();
                let entry = entries
                    .get_mut(&key)
                    .unwrap_or_else(|| panic!("{key}: wait_parts but no transfer in registry"));
                if entry.completed >= entry.parts.len() as u64 {
                    if let Some(err) = entry.first_error.take() {
                        return Err(err);
                    }
                    let tags = entry
                        .part_tags
                        .iter()
                        .enumerate()
                        .map(|(i, tag)| (i as u32 + 1, tag.clone()))
                        .collect();
                    return Ok((entry.upload_id.clone(), tags));
                }
            }
            notified.await;
        }
    }

    /// Park the pending complete outcome.
    pub fn set_complete_rx(&self, bucket: &str, object: &str, rx: CompleteReceiver) {
        let key = registry_key(bucket, object);
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&key)
            .unwrap_or_else(|| panic!("{key}: set_complete_rx but no transfer in registry"));
        entry.complete_rx = Some(rx);
    }

    /// Take the pending complete outcome.
    pub fn take_complete_rx(&self, bucket: &str, object: &str) -> CompleteReceiver {
        let key = registry_key(bucket, object);
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&key)
            .unwrap_or_else(|| panic!("{key}: take_complete_rx but no transfer in registry"));
        entry
            .complete_rx
            .take()
            .unwrap_or_else(|| panic!("{key}: complete outcome already taken"))
    }

    /// Reset the entry to `Ready`, releasing payload and part state so the
    /// key can host a later transfer.
    pub fn finish(&self, bucket: &str, object: &str) {
        let key = registry_key(bucket, object);
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&key)
            .unwrap_or_else(|| panic!("{key}: finish but no transfer in registry"));
        *entry = TransferEntry::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn dummy_parts(n: u64) -> Vec<Segment> {
        (0..n)
            .map(|i| Segment {
                start: i * 8,
                end: i * 8 + 7,
            })
            .collect()
    }

    fn begin_with_parts(registry: &TransferRegistry, n: u64) -> oneshot::Sender<Result<String, TransferError>> {
        let (tx, rx) = oneshot::channel();
        registry.begin("b", "o", dummy_parts(n), Bytes::new(), rx);
        tx
    }

    #[test]
    fn unknown_key_is_ready() {
        let registry = TransferRegistry::new();
        assert_eq!(registry.stage("b", "o"), TransferStage::Ready);
    }

    #[test]
    #[should_panic(expected = "begin before previous transfer finished")]
    fn begin_while_in_flight_panics() {
        let registry = TransferRegistry::new();
        let _tx = begin_with_parts(&registry, 2);
        let _tx2 = begin_with_parts(&registry, 2);
    }

    #[test]
    #[should_panic(expected = "advance from")]
    fn advance_from_wrong_stage_panics() {
        let registry = TransferRegistry::new();
        let _tx = begin_with_parts(&registry, 1);
        registry.advance("b", "o", TransferStage::Active, TransferStage::CompletionPending);
    }

    #[tokio::test]
    async fn out_of_order_completions_yield_ascending_tags() {
        let registry = TransferRegistry::new();
        let _tx = begin_with_parts(&registry, 5);
        registry.advance("b", "o", TransferStage::CreatePending, TransferStage::Active);
        registry.set_upload_id("b", "o", "up-1".to_string());

        // Deliver completions in reverse order.
        for i in (0..5usize).rev() {
            registry.record_part_tag("b", "o", i, format!("tag-{}", i + 1));
        }

        let (upload_id, tags) = registry.wait_parts("b", "o").await.unwrap();
        assert_eq!(upload_id, "up-1");
        let expected: Vec<(u32, String)> =
            (1..=5).map(|n| (n, format!("tag-{n}"))).collect();
        assert_eq!(tags, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn waiter_blocks_until_all_parts_report() {
        let registry = Arc::new(TransferRegistry::new());
        let _tx = begin_with_parts(&registry, 3);
        registry.advance("b", "o", TransferStage::CreatePending, TransferStage::Active);

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_parts("b", "o").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        for i in 0..3usize {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry.record_part_tag("b", "o", i, format!("t{i}"));
            });
        }

        let (_, tags) = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("parts never finished")
            .unwrap()
            .unwrap();
        assert_eq!(tags.len(), 3);
    }

    #[tokio::test]
    async fn first_part_failure_is_surfaced() {
        let registry = TransferRegistry::new();
        let _tx = begin_with_parts(&registry, 2);
        registry.advance("b", "o", TransferStage::CreatePending, TransferStage::Active);

        registry.record_part_failure("b", "o", TransferError::backend("upload_part", "first"));
        registry.record_part_failure("b", "o", TransferError::backend("upload_part", "second"));

        let err = registry.wait_parts("b", "o").await.unwrap_err();
        assert!(err.to_string().contains("first"));
    }

    #[test]
    fn finish_returns_key_to_ready_for_reuse() {
        let registry = TransferRegistry::new();
        let _tx = begin_with_parts(&registry, 1);
        registry.advance("b", "o", TransferStage::CreatePending, TransferStage::Active);
        registry.advance("b", "o", TransferStage::Active, TransferStage::CompletionPending);
        registry.finish("b", "o");
        assert_eq!(registry.stage("b", "o"), TransferStage::Ready);

        // The key can host a fresh transfer.
        let _tx2 = begin_with_parts(&registry, 2);
        assert_eq!(registry.stage("b", "o"), TransferStage::CreatePending);
    }
}
