use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

/// Receives fractional progress in `[0, 1]` while a runner works.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: f64);
}

/// Per-execution state handed down to runners: the cooperative cancel flag
/// and an optional progress sink. Cancellation is advisory and is only
/// observed between LLM calls and between workflow nodes.
#[derive(Clone, Default)]
pub struct RunContext {
    cancel: Arc<AtomicBool>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl RunContext {
    pub fn new(cancel: Arc<AtomicBool>, progress: Option<Arc<dyn ProgressSink>>) -> Self {
        Self { cancel, progress }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Nested runs (an agent inside a workflow node) share the cancel flag
    /// but do not report progress of their own.
    pub fn nested(&self) -> Self {
        Self {
            cancel: self.cancel.clone(),
            progress: None,
        }
    }

    pub async fn report_progress(&self, progress: f64) {
        if let Some(sink) = &self.progress {
            sink.report(progress.clamp(0.0, 1.0)).await;
        }
    }
}
