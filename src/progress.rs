use crate::report::{ProcessingResult, ResultStatus, StatusCounts};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct ProgressState {
    pub completed_count: usize,
    pub total_count: usize,
    pub started_at: Instant,
    pub last_update_at: Instant,
    last_percent: f64,
    counts: StatusCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    pub percent_complete: f64,
    pub elapsed_secs: f64,
    pub eta_secs: f64,
    pub counts: StatusCounts,
}

/// `elapsed * (total - completed) / max(completed, 1)`.
pub fn estimate_remaining(elapsed: Duration, total: usize, completed: usize) -> Duration {
    let remaining = total.saturating_sub(completed) as f64;
    elapsed.mul_f64(remaining / completed.max(1) as f64)
}

pub struct ProgressTracker {
    state: Mutex<ProgressState>,
    publisher: Mutex<Option<mpsc::Sender<ProgressSnapshot>>>,
}

impl ProgressTracker {
    pub fn new(total_count: usize) -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(ProgressState {
                completed_count: 0,
                total_count,
                started_at: now,
                last_update_at: now,
                last_percent: 0.0,
                counts: StatusCounts::default(),
            }),
            publisher: Mutex::new(None),
        }
    }

    /// Tracker plus the receiving end of a bounded snapshot channel. Snapshots
    /// are dropped rather than waited on when the consumer falls behind.
    pub fn with_channel(
        total_count: usize,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ProgressSnapshot>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let tracker = Self::new(total_count);
        *tracker.publisher.lock() = Some(tx);
        (tracker, rx)
    }

    pub fn on_result(&self, result: &ProcessingResult) -> ProgressSnapshot {
        self.record(result.status, result.is_cancelled(), Instant::now())
    }

    pub fn record(&self, status: ResultStatus, cancelled: bool, now: Instant) -> ProgressSnapshot {
        let snapshot = {
            let mut st = self.state.lock();
            st.completed_count += 1;
            st.last_update_at = now;
            match status {
                ResultStatus::Success => st.counts.success += 1,
                ResultStatus::Warning => st.counts.warning += 1,
                ResultStatus::Failure => st.counts.failure += 1,
                ResultStatus::Skipped => st.counts.skipped += 1,
            }
            if cancelled {
                st.counts.cancelled += 1;
            }
            Self::compute(&mut st, now)
        };
        self.publish(&snapshot);
        snapshot
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let mut st = self.state.lock();
        let now = st.last_update_at;
        Self::compute(&mut st, now)
    }

    /// Drops the publisher so the consumer's `recv` ends.
    pub fn close(&self) {
        self.publisher.lock().take();
    }

    fn compute(st: &mut ProgressState, now: Instant) -> ProgressSnapshot {
        let raw = if st.total_count == 0 {
            100.0
        } else {
            (st.completed_count as f64 / st.total_count as f64 * 100.0).min(100.0)
        };
        st.last_percent = st.last_percent.max(raw);
        let elapsed = now.saturating_duration_since(st.started_at);
        ProgressSnapshot {
            completed: st.completed_count,
            total: st.total_count,
            percent_complete: st.last_percent,
            elapsed_secs: elapsed.as_secs_f64(),
            eta_secs: estimate_remaining(elapsed, st.total_count, st.completed_count)
                .as_secs_f64(),
            counts: st.counts,
        }
    }

    fn publish(&self, snapshot: &ProgressSnapshot) {
        let guard = self.publisher.lock();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        match tx.try_send(snapshot.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(completed = snapshot.completed, "progress channel full; snapshot dropped")
            }
            Err(TrySendError::Closed(_)) => trace!("progress consumer gone"),
        }
    }
}
