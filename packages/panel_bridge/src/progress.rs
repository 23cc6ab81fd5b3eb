use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Returned by [`ProgressTracker::begin`]; the UI echoes `id` back to finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressHandle {
    pub id: String,
}

#[derive(Debug, Clone)]
struct ProgressOp {
    title: String,
    started_at: DateTime<Utc>,
    /// Tie-break for operations started within the same clock tick
    seq: u64,
}

/// In-flight progress indicators for one panel.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    ops: HashMap<String, ProgressOp>,
    next_seq: u64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation under `id`, or a fresh UUID when the UI sent none.
    pub fn begin(&mut self, title: &str, id: Option<String>) -> ProgressHandle {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let op = ProgressOp {
            title: title.to_string(),
            started_at: Utc::now(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        if self.ops.insert(id.clone(), op).is_some() {
            debug!(id = %id, "progress id reused; restarting");
        }
        info!(id = %id, title = %title, "progress started");
        ProgressHandle { id }
    }

    /// Complete `id`, returning how long it ran. Unknown ids are ignored.
    pub fn finish(&mut self, id: &str) -> Option<Duration> {
        let op = self.ops.remove(id)?;
        let elapsed = elapsed_since(op.started_at);
        info!(id = %id, title = %op.title, elapsed_ms = elapsed.as_millis() as u64, "progress finished");
        Some(elapsed)
    }

    /// Finish the oldest operation titled `title`.
    pub fn finish_by_title(&mut self, title: &str) -> Option<(String, Duration)> {
        let id = self
            .ops
            .iter()
            .filter(|(_, op)| op.title == title)
            .min_by_key(|(_, op)| (op.started_at, op.seq))
            .map(|(id, _)| id.clone())?;
        let elapsed = self.finish(&id)?;
        Some((id, elapsed))
    }

    pub fn in_flight(&self) -> usize {
        self.ops.len()
    }
}

fn elapsed_since(started_at: DateTime<Utc>) -> Duration {
    (Utc::now() - started_at).to_std().unwrap_or_default()
}
