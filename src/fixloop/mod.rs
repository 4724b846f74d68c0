// Autonomous fix loop
//
// Consumes diagnostics, consults the pattern cache, asks the generative
// backend for fixes on a miss, applies them as synthetic operations through
// the session manager, and re-verifies. One dispatcher task routes
// diagnostics; one task per file drives the active attempt. A file never
// has two attempts in flight; later diagnostics queue until the current
// attempt reaches a terminal state.

mod attempt;
mod backoff;
mod diagnostic;

pub use attempt::AttemptOutcome;
pub use backoff::Backoff;
pub use diagnostic::Diagnostic;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::backend::FixBackend;
use crate::cache::CacheHandle;
use crate::metrics::{FixOutcomeMetric, MetricsLogger};
use crate::session::SessionManager;

use attempt::AttemptContext;

/// Fix loop tuning, carried in from the loaded configuration. There is no
/// process-wide settings singleton.
#[derive(Debug, Clone)]
pub struct FixLoopConfig {
    /// Attempt cycles before a diagnostic is abandoned.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// How long `Verifying` waits for a fresh diagnostic before treating
    /// silence as success.
    pub verify_timeout_ms: u64,
    /// Outer bound on one backend call.
    pub backend_timeout_secs: u64,
}

impl Default for FixLoopConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 8_000,
            verify_timeout_ms: 2_000,
            backend_timeout_secs: 60,
        }
    }
}

/// Events the fix loop surfaces to the outside (the gateway forwards
/// `Unresolved` to the IDE collaborator).
#[derive(Debug, Clone)]
pub enum FixEvent {
    Resolved {
        file_id: String,
        attempts: u32,
        from_cache: bool,
    },
    Unresolved(Diagnostic),
}

pub(crate) enum DispatcherMsg {
    Incoming(Diagnostic),
    /// An attempt in `Verifying` waits for the next diagnostic on its file.
    AwaitVerify {
        file_id: String,
        reply: oneshot::Sender<Diagnostic>,
    },
    Finished {
        file_id: String,
        outcome: AttemptOutcome,
    },
}

/// Handle for pushing diagnostics into the loop.
#[derive(Clone)]
pub struct FixLoopHandle {
    tx: mpsc::UnboundedSender<DispatcherMsg>,
}

impl FixLoopHandle {
    pub fn report(&self, diagnostic: Diagnostic) {
        let _ = self.tx.send(DispatcherMsg::Incoming(diagnostic));
    }
}

/// Spawn the dispatcher. `events_tx` receives terminal-state events.
pub fn spawn(
    sessions: SessionManager,
    cache: CacheHandle,
    backend: Arc<dyn FixBackend>,
    config: FixLoopConfig,
    events_tx: mpsc::UnboundedSender<FixEvent>,
    metrics: Option<MetricsLogger>,
) -> FixLoopHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher {
        sessions,
        cache,
        backend,
        config,
        events_tx,
        metrics,
        files: HashMap::new(),
        tx: tx.clone(),
    };
    tokio::spawn(dispatcher.run(rx));
    FixLoopHandle { tx }
}

#[derive(Default)]
struct FileState {
    active_since: Option<Instant>,
    pending: VecDeque<Diagnostic>,
    verify_waiter: Option<oneshot::Sender<Diagnostic>>,
}

struct Dispatcher {
    sessions: SessionManager,
    cache: CacheHandle,
    backend: Arc<dyn FixBackend>,
    config: FixLoopConfig,
    events_tx: mpsc::UnboundedSender<FixEvent>,
    metrics: Option<MetricsLogger>,
    files: HashMap<String, FileState>,
    tx: mpsc::UnboundedSender<DispatcherMsg>,
}

impl Dispatcher {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DispatcherMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                DispatcherMsg::Incoming(diagnostic) => self.handle_incoming(diagnostic),
                DispatcherMsg::AwaitVerify { file_id, reply } => {
                    let state = self.files.entry(file_id).or_default();
                    state.verify_waiter = Some(reply);
                }
                DispatcherMsg::Finished { file_id, outcome } => {
                    self.handle_finished(file_id, outcome);
                }
            }
        }
    }

    fn handle_incoming(&mut self, diagnostic: Diagnostic) {
        let file_id = diagnostic.file_id.clone();
        let state = self.files.entry(file_id.clone()).or_default();

        // A verifying attempt gets first claim on the diagnostic.
        if let Some(waiter) = state.verify_waiter.take() {
            match waiter.send(diagnostic) {
                Ok(()) => return,
                Err(diagnostic) => {
                    // The verify window elapsed; fall through to routing.
                    return self.route(file_id, diagnostic);
                }
            }
        }
        self.route(file_id, diagnostic);
    }

    fn route(&mut self, file_id: String, diagnostic: Diagnostic) {
        let state = self.files.entry(file_id.clone()).or_default();
        if state.active_since.is_some() {
            debug!(file = %file_id, queued = state.pending.len() + 1, "Attempt in flight, queueing diagnostic");
            state.pending.push_back(diagnostic);
        } else {
            state.active_since = Some(Instant::now());
            self.spawn_attempt(diagnostic);
        }
    }

    fn spawn_attempt(&self, diagnostic: Diagnostic) {
        info!(file = %diagnostic.file_id, message = %diagnostic.message, "Starting fix attempt");
        let ctx = AttemptContext {
            session: self.sessions.get_or_create(&diagnostic.file_id),
            cache: self.cache.clone(),
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
            dispatcher: self.tx.clone(),
        };
        let tx = self.tx.clone();
        let file_id = diagnostic.file_id.clone();
        tokio::spawn(async move {
            let outcome = attempt::run(ctx, diagnostic).await;
            let _ = tx.send(DispatcherMsg::Finished { file_id, outcome });
        });
    }

    fn handle_finished(&mut self, file_id: String, outcome: AttemptOutcome) {
        let elapsed_ms = {
            let state = self.files.entry(file_id.clone()).or_default();
            state.verify_waiter = None;
            state
                .active_since
                .take()
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0)
        };

        let requeue = match outcome {
            AttemptOutcome::Done {
                attempts,
                from_cache,
                next,
            } => {
                info!(file = %file_id, attempts, from_cache, "Diagnostic resolved");
                self.log_outcome(&file_id, "done", attempts, from_cache, elapsed_ms);
                let _ = self.events_tx.send(FixEvent::Resolved {
                    file_id: file_id.clone(),
                    attempts,
                    from_cache,
                });
                next
            }
            AttemptOutcome::Abandoned {
                attempts,
                diagnostic,
                session_closed,
            } => {
                self.log_outcome(&file_id, "abandoned", attempts, false, elapsed_ms);
                if session_closed {
                    debug!(file = %file_id, "Attempt aborted, session closed");
                } else {
                    warn!(file = %file_id, attempts, "Diagnostic abandoned, surfacing unresolved");
                    let _ = self.events_tx.send(FixEvent::Unresolved(diagnostic));
                }
                None
            }
        };

        if let Some(diagnostic) = requeue {
            self.route(file_id.clone(), diagnostic);
            return;
        }

        // Dequeue the next waiting diagnostic, if any.
        let next = {
            let state = self.files.entry(file_id.clone()).or_default();
            state.pending.pop_front()
        };
        match next {
            Some(diagnostic) => {
                let state = self.files.entry(file_id).or_default();
                state.active_since = Some(Instant::now());
                self.spawn_attempt(diagnostic);
            }
            None => {
                self.files.remove(&file_id);
            }
        }
    }

    fn log_outcome(
        &self,
        file_id: &str,
        outcome: &str,
        attempts: u32,
        from_cache: bool,
        elapsed_ms: u64,
    ) {
        if let Some(metrics) = &self.metrics {
            let metric = FixOutcomeMetric::new(
                MetricsLogger::hash_id(file_id),
                outcome.to_string(),
                attempts,
                from_cache,
                elapsed_ms,
            );
            if let Err(e) = metrics.log_fix(&metric) {
                warn!(error = %e, "Failed to log fix outcome");
            }
        }
    }
}
