// Session owner task
//
// Exactly one task owns each session's operation log and participant set;
// it drains a command queue and is the only mutator. That serialization,
// combined with the transform engine's deterministic tie-breaks, is what
// yields convergence: every operation for a session, human or synthetic,
// passes through here one at a time, in arrival order.

use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::gateway::protocol::ServerFrame;
use crate::ot::{Applied, Operation, OperationLog, SubmitError};

/// Why an ingest did not produce an applied operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error(transparent)]
    Submit(#[from] SubmitError),
    /// The session's owner task is gone (session closed mid-flight).
    #[error("session closed")]
    SessionClosed,
}

/// Sender half of a participant's connection. The session does not own the
/// transport: a closed channel simply drops the participant from the
/// broadcast set at the next send.
pub type ParticipantSink = mpsc::UnboundedSender<ServerFrame>;

pub(super) enum SessionCommand {
    Join {
        participant_id: String,
        sink: ParticipantSink,
    },
    Leave {
        participant_id: String,
    },
    Ingest {
        op: Operation,
        reply: oneshot::Sender<Result<Applied, SubmitError>>,
    },
    Snapshot {
        reply: oneshot::Sender<(String, u64)>,
    },
}

/// Handle to one session's owner task. Cloneable; dropping every handle
/// (closing the session) ends the task.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: String,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Spawn the owner task for a session seeded with `content`.
    pub fn spawn(session_id: String, content: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let owner = SessionOwner {
            session_id: session_id.clone(),
            log: OperationLog::with_content(content),
            participants: HashMap::new(),
        };
        tokio::spawn(owner.run(rx));
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Add a participant. The snapshot is delivered on `sink` before the
    /// participant enters the broadcast set, so no `Applied` can reach a
    /// participant ahead of the snapshot it builds on.
    pub fn join(&self, participant_id: String, sink: ParticipantSink) {
        let _ = self.tx.send(SessionCommand::Join {
            participant_id,
            sink,
        });
    }

    pub fn leave(&self, participant_id: &str) {
        let _ = self.tx.send(SessionCommand::Leave {
            participant_id: participant_id.to_string(),
        });
    }

    /// Submit an operation and wait for the serialized outcome. On success
    /// the applied operation has already been broadcast to the other
    /// participants.
    pub async fn ingest(&self, op: Operation) -> Result<Applied, IngestError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Ingest { op, reply })
            .map_err(|_| IngestError::SessionClosed)?;
        match rx.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(IngestError::SessionClosed),
        }
    }

    /// Current content and revision, for late joiners and the fix loop.
    pub async fn snapshot(&self) -> Option<(String, u64)> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(SessionCommand::Snapshot { reply }).ok()?;
        rx.await.ok()
    }
}

struct SessionOwner {
    session_id: String,
    log: OperationLog,
    participants: HashMap<String, ParticipantSink>,
}

impl SessionOwner {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                SessionCommand::Join {
                    participant_id,
                    sink,
                } => self.handle_join(participant_id, sink),
                SessionCommand::Leave { participant_id } => {
                    self.participants.remove(&participant_id);
                    debug!(session = %self.session_id, participant = %participant_id, "Participant left");
                }
                SessionCommand::Ingest { op, reply } => {
                    let result = self.handle_ingest(op);
                    let _ = reply.send(result);
                }
                SessionCommand::Snapshot { reply } => {
                    let _ = reply.send(self.log.snapshot());
                }
            }
        }
        debug!(session = %self.session_id, "Session closed");
    }

    fn handle_join(&mut self, participant_id: String, sink: ParticipantSink) {
        let (content, revision) = self.log.snapshot();
        let snapshot = ServerFrame::Snapshot {
            session_id: self.session_id.clone(),
            content,
            revision,
        };
        if sink.send(snapshot).is_err() {
            // Connection died before the snapshot went out; never add it.
            return;
        }
        self.participants.insert(participant_id.clone(), sink);
        debug!(session = %self.session_id, participant = %participant_id, "Participant joined");
    }

    fn handle_ingest(&mut self, op: Operation) -> Result<Applied, SubmitError> {
        let origin = op.origin.clone();
        match self.log.submit(op) {
            Ok(applied) => {
                let frame = ServerFrame::Applied {
                    session_id: self.session_id.clone(),
                    origin: applied.operation.origin.clone(),
                    revision: applied.revision,
                    edits: applied.operation.edits.clone(),
                };
                self.broadcast(frame, Some(origin.key()));
                Ok(applied)
            }
            Err(err @ SubmitError::Unresolvable { .. }) => {
                // Should not happen given the transform rules. Flag every
                // participant for a full resync rather than apply garbage.
                warn!(session = %self.session_id, error = %err, "Unresolvable transform, requesting resync");
                let frame = ServerFrame::Resync {
                    session_id: self.session_id.clone(),
                };
                self.broadcast(frame, None);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Send a frame to every participant, minus `skip` (the origin of an
    /// applied operation). Dead channels are pruned as they are found.
    fn broadcast(&mut self, frame: ServerFrame, skip: Option<&str>) {
        let mut dead = Vec::new();
        for (id, sink) in &self.participants {
            if skip == Some(id.as_str()) {
                continue;
            }
            if sink.send(frame.clone()).is_err() {
                dead.push(id.clone());
            }
        }
        for id in dead {
            self.participants.remove(&id);
            debug!(session = %self.session_id, participant = %id, "Pruned dead participant");
        }
    }
}
