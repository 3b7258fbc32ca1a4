//! Operation drivers: Put, Get, List, Delete.
//!
//! Every driver is assembled from the same pieces: the segment planner
//! decides the sub-requests, spawned tasks issue them against the
//! [`ObjectStore`], and completions flow back through the transfer
//! registry or a goal counter.  Synchronous entry points (`put`,
//! `get_range`, `list`, `delete`) block the caller on those waits; the
//! `*_async` variants hand back a [`WorkItem`] the caller resumes.
//!
//! There is no retry or timeout anywhere in this layer: a backend failure
//! surfaces as a typed error from the wait point, and a hung backend call
//! blocks its waiter.  A retrying [`ObjectStore`] decorator is the place
//! to change that.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use metrics::{counter, histogram};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::backend::store::ObjectStore;
use crate::config::TransferConfig;
use crate::errors::TransferError;
use crate::metrics::{DELETE_TOTAL, GET_TOTAL, LIST_TOTAL, PARTS_TOTAL, PUT_TOTAL, TRANSFER_BYTES};
use crate::registry::{TransferRegistry, TransferStage};
use crate::segment::{plan_segments, Segment};
use crate::work::{Download, Step, StepFuture, WorkItem, WorkStep};

/// The transfer engine.  Cheap to clone; clones share the backend,
/// configuration, and transfer registry.
#[derive(Clone)]
pub struct TransferEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: Arc<dyn ObjectStore>,
    config: TransferConfig,
    registry: TransferRegistry,
}

impl TransferEngine {
    pub fn new(store: Arc<dyn ObjectStore>, config: TransferConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                config,
                registry: TransferRegistry::new(),
            }),
        }
    }

    fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.inner.store
    }

    fn registry(&self) -> &TransferRegistry {
        &self.inner.registry
    }

    /// Stage of the in-flight transfer for a key, if any.
    pub fn transfer_stage(&self, bucket: &str, object: &str) -> TransferStage {
        self.registry().stage(bucket, object)
    }

    // -- Head ------------------------------------------------------------------

    /// Size of the object in bytes.
    pub async fn get_size(&self, bucket: &str, object: &str) -> Result<u64, TransferError> {
        self.store().head_object(bucket, object).await
    }

    /// Whether the object exists.  Not-found is an answer, not an error.
    pub async fn exists(&self, bucket: &str, object: &str) -> Result<bool, TransferError> {
        match self.store().head_object(bucket, object).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    // -- Put -------------------------------------------------------------------

    /// Upload `data`, blocking until the transfer finishes.
    pub async fn put(&self, bucket: &str, object: &str, data: Bytes) -> Result<(), TransferError> {
        self.put_async(bucket, object, data).drive().await
    }

    /// Start an upload and return the remaining steps as a work item.
    ///
    /// Payloads below `default_part_size` go single-shot; larger payloads
    /// run the staged multi-part machine against the transfer registry.
    /// Panics if a multi-part transfer for this key is already in flight.
    pub fn put_async(&self, bucket: &str, object: &str, data: Bytes) -> WorkItem {
        let mut work = WorkItem::new(bucket, object);
        histogram!(TRANSFER_BYTES, "op" => "put").record(data.len() as f64);
        if (data.len() as u64) < self.inner.config.default_part_size {
            counter!(PUT_TOTAL, "mode" => "single").increment(1);
            debug!(
                "put [{bucket}] {object}: {} bytes below part threshold, single-shot",
                data.len()
            );
            self.put_single_start(&mut work, data);
            work.push(self.step(StepKind::PutSingleFinish));
        } else {
            counter!(PUT_TOTAL, "mode" => "multi").increment(1);
            self.put_multi_start(&mut work, data);
            // Reverse dependency order: upload runs first, finish last.
            work.push(self.step(StepKind::PutMultiFinish));
            work.push(self.step(StepKind::PutMultiComplete));
            work.push(self.step(StepKind::PutMultiUpload));
        }
        work
    }

    /// Issue the single-shot put; the outcome is parked on the work item.
    fn put_single_start(&self, work: &mut WorkItem, data: Bytes) {
        let (tx, rx) = oneshot::channel();
        work.set_outcome_rx(rx);
        let goal = work.goal().clone();
        goal.set_goal(1);

        let store = self.store().clone();
        let bucket = work.bucket().to_string();
        let object = work.object().to_string();
        tokio::spawn(async move {
            let result = store.put_object(&bucket, &object, data).await;
            let _ = tx.send(result);
            goal.goal_minus_one();
        });
    }

    async fn put_single_finish(&self, work: &mut WorkItem) -> Result<(), TransferError> {
        work.goal().wait_goal().await;
        let mut rx = work
            .take_outcome_rx()
            .expect("single put finish without a pending outcome");
        // The goal was reached, so the sender has already fired.
        rx.try_recv()
            .unwrap_or_else(|_| Err(TransferError::backend("put_object", "worker task dropped")))
    }

    /// Stage 1 (`Ready` -> `CreatePending`): plan segments, register the
    /// transfer, and issue the create call.  Panics on a zero-size payload;
    /// callers route those to the single-shot path.
    fn put_multi_start(&self, work: &mut WorkItem, data: Bytes) {
        let bucket = work.bucket().to_string();
        let object = work.object().to_string();
        let size = data.len() as u64;
        assert!(size > 0, "multi-part put of a zero-size payload");

        let parts = plan_segments(0, size, &self.inner.config);
        debug!(
            "put [{bucket}] {object}: {size} bytes in {} parts",
            parts.len()
        );

        let (tx, rx) = oneshot::channel();
        self.registry().begin(&bucket, &object, parts, data, rx);

        let store = self.store().clone();
        tokio::spawn(async move {
            let result = store.create_multipart(&bucket, &object).await;
            let _ = tx.send(result);
        });
    }

    /// Stage 2 (`CreatePending` -> `Active`): collect the upload id and
    /// fan out one upload task per part.
    async fn put_multi_upload(&self, work: &mut WorkItem) -> Result<(), TransferError> {
        let bucket = work.bucket().to_string();
        let object = work.object().to_string();

        let (create_rx, parts, data) = self.registry().upload_plan(&bucket, &object);
        self.registry().advance(
            &bucket,
            &object,
            TransferStage::CreatePending,
            TransferStage::Active,
        );

        let upload_id = match create_rx.await {
            Ok(result) => result,
            Err(_) => Err(TransferError::backend(
                "create_multipart",
                "worker task dropped",
            )),
        };
        let upload_id = match upload_id {
            Ok(id) => id,
            Err(err) => {
                // Nothing was uploaded; release the key for a later attempt.
                self.registry().finish(&bucket, &object);
                return Err(err);
            }
        };
        self.registry()
            .set_upload_id(&bucket, &object, upload_id.clone());

        for (index, part) in parts.iter().enumerate() {
            counter!(PARTS_TOTAL, "op" => "upload_part").increment(1);
            let chunk = data.slice(part.buf_range(0));
            let engine = self.clone();
            let bucket = bucket.clone();
            let object = object.clone();
            let upload_id = upload_id.clone();
            let part_number = index as u32 + 1;
            tokio::spawn(async move {
                match engine
                    .store()
                    .upload_part(&bucket, &object, &upload_id, part_number, chunk)
                    .await
                {
                    Ok(tag) => {
                        engine
                            .registry()
                            .record_part_tag(&bucket, &object, index, tag);
                    }
                    Err(err) => {
                        warn!("upload of part {part_number} failed: [{bucket}] {object}: {err}");
                        engine.registry().record_part_failure(&bucket, &object, err);
                    }
                }
            });
        }
        Ok(())
    }

    /// Stage 3 (`Active` -> `CompletionPending`): wait for every part,
    /// then issue the complete call with tags in ascending part order.
    /// A part failure surfaces here; the entry is left as-is for
    /// inspection, there is no automatic abort of the remote upload.
    async fn put_multi_complete(&self, work: &mut WorkItem) -> Result<(), TransferError> {
        let bucket = work.bucket().to_string();
        let object = work.object().to_string();

        let (upload_id, tags) = self.registry().wait_parts(&bucket, &object).await?;
        self.registry().advance(
            &bucket,
            &object,
            TransferStage::Active,
            TransferStage::CompletionPending,
        );

        let store = self.store().clone();
        let (tx, rx) = oneshot::channel();
        {
            let bucket = bucket.clone();
            let object = object.clone();
            tokio::spawn(async move {
                let result = store
                    .complete_multipart(&bucket, &object, &upload_id, tags)
                    .await;
                let _ = tx.send(result);
            });
        }
        self.registry().set_complete_rx(&bucket, &object, rx);
        Ok(())
    }

    /// Stage 4 (`CompletionPending` -> `Ready`): collect the completion
    /// outcome.  Success resets the key; failure leaves the stage and
    /// partial state for the caller to inspect.
    async fn put_multi_finish(&self, work: &mut WorkItem) -> Result<(), TransferError> {
        let bucket = work.bucket().to_string();
        let object = work.object().to_string();

        let rx = self.registry().take_complete_rx(&bucket, &object);
        let result = match rx.await {
            Ok(result) => result,
            Err(_) => Err(TransferError::backend(
                "complete_multipart",
                "worker task dropped",
            )),
        };
        if result.is_ok() {
            self.registry().finish(&bucket, &object);
        }
        result
    }

    // -- Get -------------------------------------------------------------------

    /// Download `[start, start + size)` into `buf`, blocking until every
    /// segment has landed.  `buf` must be exactly `size` bytes.
    pub async fn get_range(
        &self,
        bucket: &str,
        object: &str,
        start: u64,
        size: u64,
        buf: &mut [u8],
    ) -> Result<(), TransferError> {
        assert!(
            buf.len() as u64 == size,
            "destination buffer of {} bytes for a {size}-byte request",
            buf.len()
        );
        let parts = plan_segments(start, size, &self.inner.config);
        if parts.is_empty() {
            return Ok(());
        }
        histogram!(TRANSFER_BYTES, "op" => "get").record(size as f64);

        if parts.len() == 1 {
            counter!(GET_TOTAL, "mode" => "single").increment(1);
            let part = parts[0];
            let data = self
                .store()
                .get_object_range(bucket, object, part.start, part.end)
                .await?;
            return copy_segment(buf, start, part, &data);
        }

        counter!(GET_TOTAL, "mode" => "multi").increment(1);
        let mut rx = self.spawn_range_reads(bucket, object, &parts, None);

        // Each segment writes a disjoint region of the caller's buffer, so
        // arrival order does not matter.
        let mut first_error: Option<TransferError> = None;
        for _ in 0..parts.len() {
            match rx.recv().await {
                Some(Ok((part, data))) => {
                    if let Err(err) = copy_segment(buf, start, part, &data) {
                        first_error.get_or_insert(err);
                    }
                }
                Some(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                None => {
                    first_error.get_or_insert(TransferError::backend(
                        "get_object_range",
                        "worker task dropped",
                    ));
                    break;
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Start a download and return a work item; when it finishes, the
    /// filled buffer is available via [`WorkItem::take_buffer`].  A
    /// zero-size request yields an already-finished item with no buffer.
    pub fn get_async(&self, bucket: &str, object: &str, start: u64, size: u64) -> WorkItem {
        let mut work = WorkItem::new(bucket, object);
        let parts = plan_segments(start, size, &self.inner.config);
        if parts.is_empty() {
            return work;
        }
        counter!(GET_TOTAL, "mode" => "async").increment(1);
        histogram!(TRANSFER_BYTES, "op" => "get").record(size as f64);

        let goal = work.goal().clone();
        goal.set_goal(parts.len() as u64);
        let rx = self.spawn_range_reads(bucket, object, &parts, Some(goal));
        work.set_download(Download {
            buf: BytesMut::zeroed(size as usize),
            base: start,
            parts: parts.len(),
            rx,
        });
        work.push(self.step(StepKind::GetFinish));
        work
    }

    /// Issue one ranged read task per segment.  Results arrive on the
    /// returned channel; when `goal` is set, each task reports completion
    /// after sending.
    fn spawn_range_reads(
        &self,
        bucket: &str,
        object: &str,
        parts: &[Segment],
        goal: Option<Arc<crate::goal::GoalCounter>>,
    ) -> mpsc::Receiver<Result<(Segment, Bytes), TransferError>> {
        // Capacity covers every part, so sends never block.
        let (tx, rx) = mpsc::channel(parts.len());
        for part in parts.iter().copied() {
            counter!(PARTS_TOTAL, "op" => "get_object_range").increment(1);
            let store = self.store().clone();
            let tx = tx.clone();
            let goal = goal.clone();
            let bucket = bucket.to_string();
            let object = object.to_string();
            tokio::spawn(async move {
                let result = store
                    .get_object_range(&bucket, &object, part.start, part.end)
                    .await
                    .map(|data| (part, data));
                let _ = tx.send(result).await;
                if let Some(goal) = goal {
                    goal.goal_minus_one();
                }
            });
        }
        rx
    }

    async fn get_multi_finish(&self, work: &mut WorkItem) -> Result<(), TransferError> {
        work.goal().wait_goal().await;
        let mut download = work
            .take_download()
            .expect("get finish without a pending download");

        let mut first_error: Option<TransferError> = None;
        for _ in 0..download.parts {
            // The goal was reached, so every result has been sent.
            match download.rx.try_recv() {
                Ok(Ok((part, data))) => {
                    if let Err(err) = copy_segment(&mut download.buf, download.base, part, &data) {
                        first_error.get_or_insert(err);
                    }
                }
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(_) => {
                    first_error.get_or_insert(TransferError::backend(
                        "get_object_range",
                        "worker task dropped",
                    ));
                    break;
                }
            }
        }
        // Hand the buffer back even on failure; the caller owns it.
        work.set_download(download);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // -- List ------------------------------------------------------------------

    /// List keys under `prefix`, driving pagination to completion.
    pub async fn list(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<BTreeSet<String>, TransferError> {
        let mut work = self.list_async(bucket, prefix);
        work.drive().await?;
        Ok(work.into_listing())
    }

    /// Start a listing; each `run_next` fetches one page.  The page step
    /// requeues itself while the backend reports more data.
    pub fn list_async(&self, bucket: &str, prefix: &str) -> WorkItem {
        counter!(LIST_TOTAL).increment(1);
        let mut work = WorkItem::new(bucket, prefix);
        work.push(self.step(StepKind::ListPage));
        work
    }

    async fn list_page(&self, work: &mut WorkItem) -> Result<(), TransferError> {
        let bucket = work.bucket().to_string();
        let prefix = work.object().to_string();
        let token = work.token().map(str::to_string);

        let page = self.store().list_objects(&bucket, &prefix, token).await?;

        if let Some(next) = page.next_token {
            assert!(
                !next.is_empty(),
                "truncated listing without a continuation token"
            );
            work.set_token(Some(next));
            work.push(self.step(StepKind::ListPage));
        } else {
            work.set_token(None);
        }

        // Accumulate names relative to the requested prefix.
        for key in page.keys {
            let name = match key.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.strip_prefix('/').unwrap_or(rest),
                None => key.as_str(),
            };
            if !name.is_empty() {
                work.listing_mut().insert(name.to_string());
            }
        }
        Ok(())
    }

    // -- Delete ----------------------------------------------------------------

    /// Delete `files` under the directory-style prefix `dir`, in batches
    /// capped at `delete_batch_max`.
    ///
    /// All batches are attempted even after a failure; only the first
    /// error is surfaced.  Callers needing an exhaustive failure list must
    /// issue smaller deletes themselves.
    pub async fn delete(
        &self,
        bucket: &str,
        dir: &str,
        files: &BTreeSet<String>,
    ) -> Result<(), TransferError> {
        if files.is_empty() {
            return Ok(());
        }
        counter!(DELETE_TOTAL).increment(1);

        let keys: Vec<String> = files.iter().map(|file| join_key(dir, file)).collect();
        let mut first_error: Option<TransferError> = None;
        for batch in keys.chunks(self.inner.config.delete_batch_max) {
            debug!("delete [{bucket}] batch of {} keys", batch.len());
            if let Err(err) = self.store().delete_objects(bucket, batch.to_vec()).await {
                warn!("delete batch failed: [{bucket}]: {err}");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // -- Step plumbing ---------------------------------------------------------

    /// Queue an engine stage as a work-item step.
    fn step(&self, kind: StepKind) -> Step {
        Box::new(EngineStep {
            engine: self.clone(),
            kind,
        })
    }
}

/// Which engine stage a queued step resumes.
enum StepKind {
    PutSingleFinish,
    PutMultiUpload,
    PutMultiComplete,
    PutMultiFinish,
    GetFinish,
    ListPage,
}

struct EngineStep {
    engine: TransferEngine,
    kind: StepKind,
}

impl WorkStep for EngineStep {
    fn run<'a>(self: Box<Self>, work: &'a mut WorkItem) -> StepFuture<'a> {
        let EngineStep { engine, kind } = *self;
        Box::pin(async move {
            match kind {
                StepKind::PutSingleFinish => engine.put_single_finish(work).await,
                StepKind::PutMultiUpload => engine.put_multi_upload(work).await,
                StepKind::PutMultiComplete => engine.put_multi_complete(work).await,
                StepKind::PutMultiFinish => engine.put_multi_finish(work).await,
                StepKind::GetFinish => engine.get_multi_finish(work).await,
                StepKind::ListPage => engine.list_page(work).await,
            }
        })
    }
}

/// Join a directory-style prefix and a file name into an object key.
fn join_key(dir: &str, file: &str) -> String {
    if dir.is_empty() {
        file.to_string()
    } else {
        format!("{}/{file}", dir.trim_end_matches('/'))
    }
}

/// Copy one fetched segment into its slot of the destination buffer.
fn copy_segment(
    buf: &mut [u8],
    base: u64,
    part: Segment,
    data: &[u8],
) -> Result<(), TransferError> {
    if data.len() as u64 != part.len() {
        return Err(TransferError::backend(
            "get_object_range",
            format!(
                "short read: {} bytes for segment of {}",
                data.len(),
                part.len()
            ),
        ));
    }
    buf[part.buf_range(base)].copy_from_slice(data);
    Ok(())
}
