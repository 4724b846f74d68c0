// Fix attempt state machine
//
// Drives one diagnostic for one file through
// Analyzing → CacheCheck → Generating → Applying → Verifying, with
// Retrying/Done/Abandoned as the only way out. The state value is the
// single source of truth for "should we try again": backend errors and
// failed verifications feed transitions, they never short-circuit the loop
// through error propagation.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::backend::{FixBackend, FixRequest};
use crate::cache::{context_window, normalize_message, signature, CachedFix};
use crate::ot::{Edit, Operation, Origin};
use crate::session::{IngestError, SessionHandle};

use super::backoff::Backoff;
use super::diagnostic::Diagnostic;
use super::{DispatcherMsg, FixLoopConfig};

/// Where a finished attempt ended up.
#[derive(Debug)]
pub enum AttemptOutcome {
    Done {
        attempts: u32,
        from_cache: bool,
        /// A fresh diagnostic consumed during verification that describes a
        /// *different* problem; the dispatcher re-queues it.
        next: Option<Diagnostic>,
    },
    Abandoned {
        attempts: u32,
        diagnostic: Diagnostic,
        /// Closed-session aborts are not surfaced: there is no file left to
        /// report on.
        session_closed: bool,
    },
}

/// Live state of an attempt. Terminal outcomes leave the loop instead of
/// becoming states, so reaching `return` is the only way to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptState {
    Analyzing,
    CacheCheck,
    Generating,
    Applying,
    Verifying,
    Retrying,
}

struct Analysis {
    signature: String,
    context: String,
}

pub(super) struct AttemptContext {
    pub session: SessionHandle,
    pub cache: crate::cache::CacheHandle,
    pub backend: Arc<dyn FixBackend>,
    pub config: FixLoopConfig,
    pub dispatcher: mpsc::UnboundedSender<DispatcherMsg>,
}

/// Run one fix attempt to a terminal state.
pub(super) async fn run(ctx: AttemptContext, diagnostic: Diagnostic) -> AttemptOutcome {
    let mut backoff = Backoff::new(ctx.config.backoff_base_ms, ctx.config.backoff_cap_ms);
    let mut attempts: u32 = 0;
    let mut state = AttemptState::Analyzing;

    // Carried between states within one cycle.
    let mut analysis: Option<Analysis> = None;
    let mut fix: Option<(CachedFix, bool)> = None;

    loop {
        debug!(file = %diagnostic.file_id, ?state, attempts, "Fix attempt transition");
        match state {
            AttemptState::Analyzing => {
                let Some((content, _)) = ctx.session.snapshot().await else {
                    return abandoned(attempts, diagnostic, true);
                };
                let context = context_window(&content, diagnostic.range);
                let sig = signature(&diagnostic.message, &context, &diagnostic.language);
                analysis = Some(Analysis {
                    signature: sig,
                    context,
                });
                state = AttemptState::CacheCheck;
            }

            AttemptState::CacheCheck => {
                let sig = &analysis.as_ref().expect("analyzed").signature;
                match ctx.cache.lookup(sig).await {
                    Ok(Some(cached)) => {
                        debug!(file = %diagnostic.file_id, "Pattern cache hit");
                        fix = Some((cached, true));
                        state = AttemptState::Applying;
                    }
                    Ok(None) => state = AttemptState::Generating,
                    Err(_) => state = AttemptState::Generating,
                }
            }

            AttemptState::Generating => {
                let analysis = analysis.as_ref().expect("analyzed");
                let request = FixRequest {
                    diagnostic_message: diagnostic.message.clone(),
                    context: analysis.context.clone(),
                    language: diagnostic.language.clone(),
                };
                let call = ctx.backend.generate_fix(&request);
                let timeout = Duration::from_secs(ctx.config.backend_timeout_secs);
                match tokio::time::timeout(timeout, call).await {
                    Ok(Ok(replacement)) => {
                        fix = Some((
                            CachedFix {
                                replacement,
                                edits: Vec::new(),
                            },
                            false,
                        ));
                        state = AttemptState::Applying;
                    }
                    Ok(Err(e)) => {
                        warn!(file = %diagnostic.file_id, error = %e, "Backend failed");
                        state = AttemptState::Retrying;
                    }
                    Err(_) => {
                        warn!(file = %diagnostic.file_id, "Backend timed out");
                        state = AttemptState::Retrying;
                    }
                }
            }

            AttemptState::Applying => {
                let Some((content, revision)) = ctx.session.snapshot().await else {
                    return abandoned(attempts, diagnostic, true);
                };
                let (cached, _) = fix.as_mut().expect("have fix");
                cached.edits = replacement_edits(&content, diagnostic.range, &cached.replacement);
                let op = Operation::new(Origin::FixLoop, revision, cached.edits.clone());
                match ctx.session.ingest(op).await {
                    Ok(_) => state = AttemptState::Verifying,
                    Err(IngestError::SessionClosed) => {
                        return abandoned(attempts, diagnostic, true);
                    }
                    Err(e) => {
                        warn!(file = %diagnostic.file_id, error = %e, "Fix submission rejected");
                        state = AttemptState::Retrying;
                    }
                }
            }

            AttemptState::Verifying => {
                let sig = analysis.as_ref().expect("analyzed").signature.clone();
                let (cached, from_cache) = fix.clone().expect("have fix");
                match await_fresh_diagnostic(&ctx, &diagnostic.file_id).await {
                    None => {
                        // Silence within the window counts as success;
                        // verification is advisory. Recording a hit refreshes
                        // confidence, a miss creates the entry.
                        let _ = ctx.cache.record(sig, cached).await;
                        return AttemptOutcome::Done {
                            attempts,
                            from_cache,
                            next: None,
                        };
                    }
                    Some(fresh) => {
                        if same_diagnostic(&fresh, &diagnostic) {
                            // Same problem still standing.
                            if from_cache {
                                let _ = ctx.cache.penalize(&sig).await;
                            }
                            state = AttemptState::Retrying;
                        } else {
                            let _ = ctx.cache.record(sig, cached).await;
                            return AttemptOutcome::Done {
                                attempts,
                                from_cache,
                                next: Some(fresh),
                            };
                        }
                    }
                }
            }

            AttemptState::Retrying => {
                attempts += 1;
                if attempts >= ctx.config.max_attempts {
                    return abandoned(attempts, diagnostic, false);
                }
                let delay = backoff.delay(attempts - 1);
                debug!(file = %diagnostic.file_id, attempts, ?delay, "Backing off before retry");
                tokio::time::sleep(delay).await;
                analysis = None;
                fix = None;
                state = AttemptState::Analyzing;
            }
        }
    }
}

fn abandoned(attempts: u32, diagnostic: Diagnostic, session_closed: bool) -> AttemptOutcome {
    AttemptOutcome::Abandoned {
        attempts,
        diagnostic,
        session_closed,
    }
}

/// Replace the diagnostic's range with the fix text. Both edits address the
/// pre-fix document: the delete covers the flagged range, the insert lands
/// at the range's end so it survives the delete at the range's start.
fn replacement_edits(content: &str, range: (u64, u64), replacement: &str) -> Vec<Edit> {
    let doc_len = content.chars().count();
    let start = (range.0 as usize).min(doc_len);
    let end = (range.1 as usize).clamp(start, doc_len);

    let mut edits = Vec::with_capacity(2);
    if end > start {
        edits.push(Edit::delete(start, end - start));
    }
    if !replacement.is_empty() {
        edits.push(Edit::insert(end, replacement));
    }
    edits
}

/// Bounded wait for the next diagnostic pushed for this file. `None` means
/// the window elapsed quietly.
async fn await_fresh_diagnostic(ctx: &AttemptContext, file_id: &str) -> Option<Diagnostic> {
    let (reply, rx) = oneshot::channel();
    ctx.dispatcher
        .send(DispatcherMsg::AwaitVerify {
            file_id: file_id.to_string(),
            reply,
        })
        .ok()?;
    let window = Duration::from_millis(ctx.config.verify_timeout_ms);
    match tokio::time::timeout(window, rx).await {
        Ok(Ok(diag)) => Some(diag),
        _ => None,
    }
}

/// "Same diagnostic" for verification purposes: the normalized message and
/// language match. The context window is *not* compared, since the applied
/// just changed it, and a persisting problem should still count as
/// persisting.
fn same_diagnostic(fresh: &Diagnostic, original: &Diagnostic) -> bool {
    fresh.language == original.language
        && normalize_message(&fresh.message) == normalize_message(&original.message)
}
