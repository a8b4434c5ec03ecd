//! Bookkeeping for bulk runs started through the operator API.
//!
//! Only one run may be active at a time. Workers report progress through an
//! unbounded channel so the synchronous progress callback never blocks. A single
//! updater task folds those reports into the shared registry and fans them out to
//! WebSocket subscribers. The finish notice travels through the same channel, so
//! `bulk.finished` is always the last event of a run.
//!
//! Only the most recent finished runs are kept.

use crate::dispatch::StopSignal;
use crate::types::{Progress, RunResult, RunState};
use crate::ws::{WsEvent, EVENT_BULK_PROGRESS};

pub const DEFAULT_FINISHED_RETENTION: usize = 20;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};

#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub run_id: String,
    pub state: RunState,
    pub progress: Option<Progress>,
    pub result: Option<RunResult>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub enum RunUpdate {
    Progress { run_id: String, progress: Progress },
    Finished(RunStatus),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConflict {
    pub active_run_id: String,
}

struct RunEntry {
    status: RunStatus,
    stop: StopSignal,
}

#[derive(Default)]
struct Registry {
    runs: HashMap<String, RunEntry>,
    active: Option<String>,
    finished: VecDeque<String>,
    retention: usize,
}

#[derive(Clone)]
pub struct RunRegistry {
    inner: Arc<RwLock<Registry>>,
    tx: mpsc::UnboundedSender<RunUpdate>,
}

impl RunRegistry {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunUpdate>) {
        Self::with_retention(DEFAULT_FINISHED_RETENTION)
    }

    /// Registry keeping at most `retention` finished runs (at least one).
    pub fn with_retention(retention: usize) -> (Self, mpsc::UnboundedReceiver<RunUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Registry {
            retention: retention.max(1),
            ..Registry::default()
        };
        (
            Self {
                inner: Arc::new(RwLock::new(registry)),
                tx,
            },
            rx,
        )
    }

    /// Registers a new run unless another one is still active.
    pub async fn try_begin(&self) -> Result<(String, StopSignal), RunConflict> {
        let mut registry = self.inner.write().await;
        if let Some(active) = registry.active.as_ref() {
            return Err(RunConflict {
                active_run_id: active.clone(),
            });
        }
        let run_id = uuid::Uuid::new_v4().to_string();
        let stop = StopSignal::new();
        registry.runs.insert(
            run_id.clone(),
            RunEntry {
                status: RunStatus {
                    run_id: run_id.clone(),
                    state: RunState::Pending,
                    progress: None,
                    result: None,
                    error: None,
                    started_at: Utc::now(),
                    finished_at: None,
                },
                stop: stop.clone(),
            },
        );
        registry.active = Some(run_id.clone());
        Ok((run_id, stop))
    }

    pub async fn mark_running(&self, run_id: &str) {
        let mut registry = self.inner.write().await;
        if let Some(entry) = registry.runs.get_mut(run_id) {
            entry.status.state = RunState::Running;
        }
    }

    /// Synchronous callback suitable for [`crate::dispatch::run`].
    pub fn progress_callback(&self, run_id: &str) -> impl FnMut(Progress) + Send + 'static {
        let tx = self.tx.clone();
        let run_id = run_id.to_string();
        move |progress| {
            let _ = tx.send(RunUpdate::Progress {
                run_id: run_id.clone(),
                progress,
            });
        }
    }

    /// Records the final state, releases the active slot and queues the
    /// `bulk.finished` notice behind any pending progress.
    pub async fn finish(&self, run_id: &str, outcome: Result<RunResult, String>) -> Option<RunStatus> {
        let mut registry = self.inner.write().await;
        if registry.active.as_deref() == Some(run_id) {
            registry.active = None;
        }
        let entry = registry.runs.get_mut(run_id)?;
        if entry.status.state.is_finished() {
            return Some(entry.status.clone());
        }
        match outcome {
            Ok(result) => {
                entry.status.state = result.state;
                entry.status.result = Some(result);
            }
            Err(error) => {
                entry.status.state = RunState::Aborted;
                entry.status.error = Some(error);
            }
        }
        entry.status.finished_at = Some(Utc::now());
        let status = entry.status.clone();

        registry.finished.push_back(run_id.to_string());
        while registry.finished.len() > registry.retention {
            if let Some(evicted) = registry.finished.pop_front() {
                registry.runs.remove(&evicted);
            }
        }

        let _ = self.tx.send(RunUpdate::Finished(status.clone()));
        Some(status)
    }

    pub async fn get(&self, run_id: &str) -> Option<RunStatus> {
        let registry = self.inner.read().await;
        registry.runs.get(run_id).map(|entry| entry.status.clone())
    }

    pub async fn active(&self) -> Option<String> {
        self.inner.read().await.active.clone()
    }

    /// Raises the stop signal of a run. Returns false for unknown or finished runs.
    pub async fn stop(&self, run_id: &str) -> bool {
        let registry = self.inner.read().await;
        match registry.runs.get(run_id) {
            Some(entry) if !entry.status.state.is_finished() => {
                entry.stop.raise();
                true
            }
            _ => false,
        }
    }

    async fn apply(&self, run_id: &str, progress: &Progress) {
        let mut registry = self.inner.write().await;
        if let Some(entry) = registry.runs.get_mut(run_id) {
            entry.status.progress = Some(progress.clone());
        }
    }
}

pub async fn start_run_updater(
    registry: RunRegistry,
    mut rx: mpsc::UnboundedReceiver<RunUpdate>,
    ws_tx: broadcast::Sender<WsEvent>,
) {
    while let Some(update) = rx.recv().await {
        let event = match update {
            RunUpdate::Progress { run_id, progress } => {
                registry.apply(&run_id, &progress).await;
                WsEvent::new(
                    EVENT_BULK_PROGRESS,
                    json!({"run_id": run_id, "progress": progress}),
                )
            }
            RunUpdate::Finished(status) => WsEvent::bulk_finished(&status),
        };
        let _ = ws_tx.send(event);
    }
}
