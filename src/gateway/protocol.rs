// Wire protocol frames
//
// Newline-delimited JSON, one frame per line, one connection per
// participant. Frames are internally tagged so a peer can dispatch on
// "type" without trial deserialization.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ot::{Edit, Origin};

/// Frame decode / protocol failures. Connection-fatal: the offending
/// connection gets an `Error` frame and is closed; the session survives.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),
    #[error("operation references unknown revision {requested} (head is {head})")]
    UnknownRevision { requested: u64, head: u64 },
}

/// Frames a client sends to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Join {
        session_id: String,
        participant_id: String,
    },
    Edit {
        session_id: String,
        base_revision: u64,
        edits: Vec<Edit>,
    },
    /// Pushed by the IDE-side diagnostics collaborator. Consumed by the fix
    /// loop; never relayed to other participants.
    Diagnostic {
        file_id: String,
        message: String,
        range: (u64, u64),
        language: String,
    },
    Leave {
        session_id: String,
        participant_id: String,
    },
}

/// Frames the daemon sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Snapshot {
        session_id: String,
        content: String,
        revision: u64,
    },
    Applied {
        session_id: String,
        origin: Origin,
        revision: u64,
        edits: Vec<Edit>,
    },
    /// The session hit a state the transform engine could not resolve;
    /// every participant should re-join for a fresh snapshot.
    Resync { session_id: String },
    /// A diagnostic the fix loop gave up on, surfaced unchanged.
    Unresolved {
        file_id: String,
        message: String,
        range: (u64, u64),
        language: String,
    },
    /// Protocol violation; the connection closes after this frame.
    Error { message: String },
}

/// Decode one line into a client frame.
pub fn decode_client_frame(line: &str) -> Result<ClientFrame, ProtocolError> {
    Ok(serde_json::from_str(line)?)
}

/// Encode a server frame as a single JSON line (no trailing newline; the
/// codec adds the delimiter).
pub fn encode_server_frame(frame: &ServerFrame) -> String {
    serde_json::to_string(frame).expect("server frames always serialize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_frame_round_trip() {
        let line = r#"{"type":"join","session_id":"main.rs","participant_id":"alice"}"#;
        let frame = decode_client_frame(line).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Join {
                session_id: "main.rs".to_string(),
                participant_id: "alice".to_string(),
            }
        );
    }

    #[test]
    fn test_edit_frame_round_trip() {
        let frame = ClientFrame::Edit {
            session_id: "main.rs".to_string(),
            base_revision: 7,
            edits: vec![Edit::insert(5, "x"), Edit::delete(9, 2)],
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back = decode_client_frame(&json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_malformed_frame_is_a_protocol_error() {
        let err = decode_client_frame("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
    }

    #[test]
    fn test_applied_frame_serializes_origin_as_string() {
        let frame = ServerFrame::Applied {
            session_id: "f".to_string(),
            origin: Origin::FixLoop,
            revision: 3,
            edits: vec![],
        };
        let json = encode_server_frame(&frame);
        assert!(json.contains(r#""origin":"fixloop""#));
    }
}
