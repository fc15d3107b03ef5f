use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use time::OffsetDateTime;

use crate::models::execution::ExecutionKind;

struct InFlight {
    kind: ExecutionKind,
    target_id: i64,
    user_id: i64,
    submitted_at: OffsetDateTime,
    started: bool,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InFlightExecution {
    pub execution_id: i64,
    pub kind: ExecutionKind,
    pub target_id: i64,
    pub user_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    pub started: bool,
}

/// Bookkeeping for executions owned by this process. The stored execution
/// row stays authoritative; entries here only carry the cancel signal and
/// feed introspection.
#[derive(Clone, Default)]
pub struct Registry {
    entries: Arc<DashMap<i64, InFlight>>,
}

impl Registry {
    /// Registers an execution and returns its cancel flag.
    pub fn insert(
        &self,
        execution_id: i64,
        kind: ExecutionKind,
        target_id: i64,
        user_id: i64,
    ) -> Arc<AtomicBool> {
        let cancel = Arc::new(AtomicBool::new(false));
        self.entries.insert(
            execution_id,
            InFlight {
                kind,
                target_id,
                user_id,
                submitted_at: OffsetDateTime::now_utc(),
                started: false,
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    pub fn cancel_flag(&self, execution_id: i64) -> Option<Arc<AtomicBool>> {
        self.entries.get(&execution_id).map(|e| e.cancel.clone())
    }

    pub fn mark_started(&self, execution_id: i64) {
        if let Some(mut entry) = self.entries.get_mut(&execution_id) {
            entry.started = true;
        }
    }

    /// Raises the cancel flag. Returns false when the execution is not tracked.
    pub fn signal_cancel(&self, execution_id: i64) -> bool {
        match self.entries.get(&execution_id) {
            Some(entry) => {
                entry.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, execution_id: i64) {
        self.entries.remove(&execution_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot ordered by execution id.
    pub fn snapshot(&self) -> Vec<InFlightExecution> {
        let mut entries: Vec<InFlightExecution> = self
            .entries
            .iter()
            .map(|entry| InFlightExecution {
                execution_id: *entry.key(),
                kind: entry.kind,
                target_id: entry.target_id,
                user_id: entry.user_id,
                submitted_at: entry.submitted_at,
                started: entry.started,
            })
            .collect();
        entries.sort_by_key(|e| e.execution_id);
        entries
    }
}
