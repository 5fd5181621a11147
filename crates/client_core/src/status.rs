use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::Serialize;
use tracing::debug;

use crate::broadcast::BroadcastCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub kind: StatusKind,
    pub text: String,
}

/// Publishes at most one message at a time. A newer message replaces the
/// current one and restarts the dismissal timer.
pub struct StatusNotifier {
    cell: Arc<BroadcastCell<Option<StatusMessage>>>,
    generation: Arc<AtomicU64>,
    success_ttl: Duration,
    failure_ttl: Duration,
}

impl StatusNotifier {
    pub fn new(success_ttl: Duration, failure_ttl: Duration) -> Self {
        Self {
            cell: Arc::new(BroadcastCell::new("status", None)),
            generation: Arc::new(AtomicU64::new(0)),
            success_ttl,
            failure_ttl,
        }
    }

    pub fn cell(&self) -> &Arc<BroadcastCell<Option<StatusMessage>>> {
        &self.cell
    }

    pub fn current(&self) -> Option<StatusMessage> {
        (*self.cell.current()).clone()
    }

    pub fn success(&self, text: impl Into<String>) {
        self.publish(StatusKind::Success, text.into(), self.success_ttl);
    }

    pub fn failure(&self, text: impl Into<String>) {
        self.publish(StatusKind::Failure, text.into(), self.failure_ttl);
    }

    pub fn dismiss(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cell.replace(None);
    }

    fn publish(&self, kind: StatusKind, text: String, ttl: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(?kind, text = %text, "status: published");
        self.cell.replace(Some(StatusMessage { kind, text }));

        // Dismissal needs a runtime; without one the message simply stays.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let cell = Arc::clone(&self.cell);
        let current_generation = Arc::clone(&self.generation);
        runtime.spawn(async move {
            tokio::time::sleep(ttl).await;
            if current_generation.load(Ordering::SeqCst) == generation {
                cell.replace(None);
            }
        });
    }
}
