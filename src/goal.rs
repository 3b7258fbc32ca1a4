//! Completion counting for fan-out sub-operations.
//!
//! A [`GoalCounter`] is set to the number of expected completions, any
//! number of tasks report in concurrently, and one waiter blocks until
//! every completion has been observed.  The counter is reusable: a new
//! goal starts a fresh epoch.

use std::sync::Mutex;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct GoalState {
    expected: u64,
    completed: u64,
}

/// Wait-group style synchronization primitive.
///
/// `completed` is monotonically non-decreasing within one epoch and must
/// never exceed `expected`; overshooting is a logic defect and panics.
#[derive(Debug, Default)]
pub struct GoalCounter {
    state: Mutex<GoalState>,
    notify: Notify,
}

impl GoalCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new epoch expecting `n` completions.
    pub fn set_goal(&self, n: u64) {
        let mut state = self.state.lock().unwrap();
        state.expected = n;
        state.completed = 0;
    }

    /// Report one completion.  Callable from any task.
    pub fn goal_minus_one(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.completed += 1;
            assert!(
                state.completed <= state.expected,
                "goal counter overshoot: {} completions against a goal of {}",
                state.completed,
                state.expected,
            );
        }
        self.notify.notify_waiters();
    }

    /// Wait until the goal of the current epoch has been reached.
    ///
    /// Safe to call before any completion has been reported: the waiter
    /// registers with the notifier before checking the predicate, so a
    /// completion landing between the check and the await cannot be lost.
    pub async fn wait_goal(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.state.lock().unwrap();
                if state.completed >= state.expected {
                    return;
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn zero_goal_returns_immediately() {
        let goal = GoalCounter::new();
        goal.set_goal(0);
        goal.wait_goal().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn waiter_started_first_sees_all_completions() {
        let goal = Arc::new(GoalCounter::new());
        goal.set_goal(5);

        // Start the waiter before any completion is reported.
        let waiter = {
            let goal = goal.clone();
            tokio::spawn(async move { goal.wait_goal().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "waiter returned before the goal");

        for _ in 0..5 {
            let goal = goal.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                goal.goal_minus_one();
            });
        }

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("goal never reached")
            .unwrap();
    }

    #[tokio::test]
    async fn counter_is_reusable_across_epochs() {
        let goal = GoalCounter::new();
        goal.set_goal(2);
        goal.goal_minus_one();
        goal.goal_minus_one();
        goal.wait_goal().await;

        goal.set_goal(1);
        goal.goal_minus_one();
        goal.wait_goal().await;
    }

    #[test]
    #[should_panic(expected = "goal counter overshoot")]
    fn overshoot_panics() {
        let goal = GoalCounter::new();
        goal.set_goal(1);
        goal.goal_minus_one();
        goal.goal_minus_one();
    }
}
