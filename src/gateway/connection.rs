// Per-connection message pump
//
// Each accepted socket gets a read task (this function) and a writer fed by
// an unbounded channel. The read side decodes newline-delimited JSON frames
// and forwards them to the session manager or the fix loop; the writer
// drains whatever the sessions broadcast back. Protocol violations send one
// `Error` frame and close this connection only.

use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, info, warn};

use crate::fixloop::{Diagnostic, FixLoopHandle};
use crate::metrics::{MetricsLogger, SessionEventMetric};
use crate::ot::{Operation, Origin, SubmitError};
use crate::session::{IngestError, SessionManager};

use super::protocol::{decode_client_frame, encode_server_frame, ClientFrame, ServerFrame};
use super::ConnectionRegistry;

/// Frames longer than this are treated as malformed.
const MAX_FRAME_LEN: usize = 1 << 20;

pub(super) async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    conn_id: u64,
    sessions: SessionManager,
    fixloop: FixLoopHandle,
    connections: ConnectionRegistry,
    metrics: Option<MetricsLogger>,
) {
    let (read_half, write_half) = stream.into_split();
    let mut lines_in = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
    let mut lines_out = FramedWrite::new(write_half, LinesCodec::new());

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();
    connections.insert(conn_id, out_tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let fatal = matches!(frame, ServerFrame::Error { .. });
            if lines_out.send(encode_server_frame(&frame)).await.is_err() {
                break;
            }
            if fatal {
                break;
            }
        }
    });

    // Sessions this connection has joined: session id → participant id.
    let mut joined: HashMap<String, String> = HashMap::new();

    while let Some(line) = lines_in.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                debug!(%peer, error = %e, "Connection read failed");
                break;
            }
        };
        let frame = match decode_client_frame(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%peer, error = %e, "Malformed frame, closing connection");
                let _ = out_tx.send(ServerFrame::Error {
                    message: e.to_string(),
                });
                break;
            }
        };
        let flow = handle_frame(
            frame,
            &sessions,
            &fixloop,
            &out_tx,
            &mut joined,
            metrics.as_ref(),
        )
        .await;
        if flow.is_break() {
            break;
        }
    }

    // Disconnect: drop out of every broadcast set without blocking anyone.
    for (session_id, participant_id) in joined {
        if let Some(handle) = sessions.get(&session_id) {
            handle.leave(&participant_id);
        }
        log_session_event(metrics.as_ref(), &session_id, "leave");
    }
    connections.remove(&conn_id);
    drop(out_tx);
    let _ = writer.await;
    debug!(%peer, "Connection closed");
}

async fn handle_frame(
    frame: ClientFrame,
    sessions: &SessionManager,
    fixloop: &FixLoopHandle,
    out_tx: &mpsc::UnboundedSender<ServerFrame>,
    joined: &mut HashMap<String, String>,
    metrics: Option<&MetricsLogger>,
) -> ControlFlow<()> {
    match frame {
        ClientFrame::Join {
            session_id,
            participant_id,
        } => {
            let handle = sessions.get_or_create(&session_id);
            handle.join(participant_id.clone(), out_tx.clone());
            info!(session = %session_id, participant = %participant_id, "Join");
            log_session_event(metrics, &session_id, "join");
            joined.insert(session_id, participant_id);
            ControlFlow::Continue(())
        }

        ClientFrame::Edit {
            session_id,
            base_revision,
            edits,
        } => {
            // Edits are only valid on sessions this connection joined.
            let Some(participant_id) = joined.get(&session_id) else {
                let _ = out_tx.send(ServerFrame::Error {
                    message: format!("edit for session {session_id} without join"),
                });
                return ControlFlow::Break(());
            };
            let op = Operation::new(
                Origin::Participant(participant_id.clone()),
                base_revision,
                edits,
            );
            match sessions.get_or_create(&session_id).ingest(op).await {
                Ok(_) => ControlFlow::Continue(()),
                Err(IngestError::Submit(SubmitError::UnknownRevision { requested, head })) => {
                    let _ = out_tx.send(ServerFrame::Error {
                        message: format!("unknown revision {requested} (head is {head})"),
                    });
                    ControlFlow::Break(())
                }
                Err(IngestError::Submit(SubmitError::Unresolvable { .. })) => {
                    // The session owner already broadcast a resync; this
                    // connection stays up and re-joins like everyone else.
                    ControlFlow::Continue(())
                }
                Err(IngestError::SessionClosed) => ControlFlow::Continue(()),
            }
        }

        ClientFrame::Diagnostic {
            file_id,
            message,
            range,
            language,
        } => {
            fixloop.report(Diagnostic::new(file_id, message, range, language));
            ControlFlow::Continue(())
        }

        ClientFrame::Leave {
            session_id,
            participant_id,
        } => {
            if let Some(handle) = sessions.get(&session_id) {
                handle.leave(&participant_id);
            }
            log_session_event(metrics, &session_id, "leave");
            joined.remove(&session_id);
            ControlFlow::Continue(())
        }
    }
}

fn log_session_event(metrics: Option<&MetricsLogger>, session_id: &str, event: &str) {
    if let Some(metrics) = metrics {
        let metric = SessionEventMetric::new(MetricsLogger::hash_id(session_id), event.to_string());
        if let Err(e) = metrics.log_session(&metric) {
            warn!(error = %e, "Failed to log session event");
        }
    }
}
