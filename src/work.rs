//! Resumable multi-step operations.
//!
//! A [`WorkItem`] is the handle a driver hands back for an asynchronous
//! Put/Get/List: a stack of remaining steps plus the per-transfer context
//! those steps share (bucket, object, goal counter, listing accumulator,
//! continuation token).  The caller resumes the operation by invoking
//! [`run_next`](WorkItem::run_next) until the stack is empty; a step may
//! push further steps, which is how open-ended pagination requeues itself.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};

use crate::errors::TransferError;
use crate::goal::GoalCounter;
use crate::segment::Segment;

/// Future returned by one step, borrowing the work item it runs against.
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + 'a>>;

/// One unit of deferred work.  Runs at most once; may push successors
/// onto the work item it receives.
pub trait WorkStep: Send + 'static {
    fn run<'a>(self: Box<Self>, work: &'a mut WorkItem) -> StepFuture<'a>;
}

/// Boxed step as stored on the continuation stack.
pub type Step = Box<dyn WorkStep>;

/// Outcome of one downloaded segment, delivered over the work item's
/// channel by the task that fetched it.
pub type PartResult = Result<(Segment, Bytes), TransferError>;

/// In-flight download state: the destination buffer plus the channel the
/// part tasks report through.  Each segment writes to a disjoint region of
/// `buf`, so arrival order does not matter.
pub struct Download {
    pub buf: BytesMut,
    pub base: u64,
    pub parts: usize,
    pub rx: mpsc::Receiver<PartResult>,
}

/// A continuation-chained asynchronous operation against one
/// bucket/object key.
pub struct WorkItem {
    bucket: String,
    object: String,
    goal: Arc<GoalCounter>,
    steps: Vec<Step>,
    listing: BTreeSet<String>,
    token: Option<String>,
    download: Option<Download>,
    outcome_rx: Option<oneshot::Receiver<Result<(), TransferError>>>,
}

impl WorkItem {
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
            goal: Arc::new(GoalCounter::new()),
            steps: Vec::new(),
            listing: BTreeSet::new(),
            token: None,
            download: None,
            outcome_rx: None,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    /// Completion counter shared with the tasks this operation spawned.
    pub fn goal(&self) -> &Arc<GoalCounter> {
        &self.goal
    }

    /// Add a step to run after the current one.  Steps execute in reverse
    /// push order, so drivers push in reverse dependency order.
    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Pop and execute the next step.  Panics if no steps remain; check
    /// [`is_done`](Self::is_done) first.
    pub async fn run_next(&mut self) -> Result<(), TransferError> {
        let step = self
            .steps
            .pop()
            .expect("run_next on a finished work item");
        step.run(self).await
    }

    pub fn is_done(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run remaining steps to completion, stopping at the first error.
    pub async fn drive(&mut self) -> Result<(), TransferError> {
        while !self.is_done() {
            self.run_next().await?;
        }
        Ok(())
    }

    // -- Listing / pagination context -----------------------------------------

    /// Keys accumulated by a List operation so far.
    pub fn listing(&self) -> &BTreeSet<String> {
        &self.listing
    }

    pub fn listing_mut(&mut self) -> &mut BTreeSet<String> {
        &mut self.listing
    }

    pub fn into_listing(self) -> BTreeSet<String> {
        self.listing
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    // -- Download context -----------------------------------------------------

    pub fn set_download(&mut self, download: Download) {
        self.download = Some(download);
    }

    pub fn take_download(&mut self) -> Option<Download> {
        self.download.take()
    }

    /// The filled buffer of a finished Get, if this work item carried one.
    pub fn take_buffer(&mut self) -> Option<BytesMut> {
        self.download.take().map(|d| d.buf)
    }

    // -- Single-request outcome ----------------------------------------------

    pub fn set_outcome_rx(&mut self, rx: oneshot::Receiver<Result<(), TransferError>>) {
        self.outcome_rx = Some(rx);
    }

    pub fn take_outcome_rx(&mut self) -> Option<oneshot::Receiver<Result<(), TransferError>>> {
        self.outcome_rx.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Appends its marker to the token, recording execution order.
    struct AppendMarker(&'static str);

    impl WorkStep for AppendMarker {
        fn run<'a>(self: Box<Self>, work: &'a mut WorkItem) -> StepFuture<'a> {
            Box::pin(async move {
                let trail = work.token().unwrap_or("").to_string();
                work.set_token(Some(trail + self.0));
                Ok(())
            })
        }
    }

    /// Pagination shape: requeues itself until the counter in the token
    /// reaches one.
    struct Countdown;

    impl WorkStep for Countdown {
        fn run<'a>(self: Box<Self>, work: &'a mut WorkItem) -> StepFuture<'a> {
            Box::pin(async move {
                let remaining: u32 = work.token().unwrap_or("0").parse().unwrap();
                work.listing_mut().insert(format!("page-{remaining}"));
                if remaining > 1 {
                    work.set_token(Some((remaining - 1).to_string()));
                    work.push(Box::new(Countdown));
                }
                Ok(())
            })
        }
    }

    struct AlwaysFails;

    impl WorkStep for AlwaysFails {
        fn run<'a>(self: Box<Self>, _work: &'a mut WorkItem) -> StepFuture<'a> {
            Box::pin(async { Err(TransferError::backend("list_objects", "boom")) })
        }
    }

    #[tokio::test]
    async fn steps_run_in_reverse_push_order() {
        let mut work = WorkItem::new("b", "o");
        work.push(Box::new(AppendMarker("a")));
        work.push(Box::new(AppendMarker("b")));
        work.push(Box::new(AppendMarker("c")));
        work.drive().await.unwrap();
        assert_eq!(work.token(), Some("cba"));
        assert!(work.is_done());
    }

    #[tokio::test]
    async fn a_step_may_requeue_itself() {
        let mut work = WorkItem::new("b", "o");
        work.set_token(Some("3".to_string()));
        work.push(Box::new(Countdown));

        let mut invocations = 0;
        while !work.is_done() {
            work.run_next().await.unwrap();
            invocations += 1;
        }
        assert_eq!(invocations, 3);
        assert_eq!(work.listing().len(), 3);
    }

    #[tokio::test]
    async fn drive_stops_at_first_error() {
        let mut work = WorkItem::new("b", "o");
        work.push(Box::new(AppendMarker("never")));
        work.push(Box::new(AlwaysFails));
        assert!(work.drive().await.is_err());
        // The failing step ran first (LIFO); the marker step never did.
        assert_eq!(work.token(), None);
        assert!(!work.is_done());
    }
}
