// Wire protocol integration tests
//
// Talks to a full daemon stack over real sockets: join/snapshot ordering,
// applied broadcasts, protocol violations, and diagnostics driving the fix
// loop into the shared document.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};

use wren::backend::{BackendError, FixBackend, FixRequest};
use wren::cache::{CacheHandle, PatternCache};
use wren::fixloop::{self, FixLoopConfig};
use wren::gateway::protocol::{ClientFrame, ServerFrame};
use wren::gateway::Gateway;
use wren::session::SessionManager;

struct StaticBackend {
    replacement: String,
}

#[async_trait]
impl FixBackend for StaticBackend {
    async fn generate_fix(&self, _request: &FixRequest) -> Result<String, BackendError> {
        Ok(self.replacement.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(stream, LinesCodec::new()),
        }
    }

    async fn send(&mut self, frame: &ClientFrame) {
        let line = serde_json::to_string(frame).unwrap();
        self.framed.send(line).await.unwrap();
    }

    async fn send_raw(&mut self, line: &str) {
        self.framed.send(line.to_string()).await.unwrap();
    }

    async fn recv(&mut self) -> Option<ServerFrame> {
        let line = tokio::time::timeout(Duration::from_secs(10), self.framed.next())
            .await
            .expect("timed out waiting for frame")?
            .ok()?;
        Some(serde_json::from_str(&line).unwrap())
    }
}

/// Boot a daemon on an ephemeral port and return its address plus the
/// session registry (for seeding file content).
async fn boot(replacement: &str) -> (std::net::SocketAddr, SessionManager) {
    let sessions = SessionManager::new();
    let cache = CacheHandle::spawn(PatternCache::new(64), None);
    let backend = Arc::new(StaticBackend {
        replacement: replacement.to_string(),
    });
    let config = FixLoopConfig {
        max_attempts: 3,
        backoff_base_ms: 1,
        backoff_cap_ms: 4,
        verify_timeout_ms: 50,
        backend_timeout_secs: 5,
    };
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let fixloop = fixloop::spawn(
        sessions.clone(),
        cache,
        backend,
        config,
        events_tx,
        None,
    );

    let gateway = Gateway::bind("127.0.0.1:0", sessions.clone(), fixloop, events_rx, None)
        .await
        .unwrap();
    let addr = gateway.local_addr().unwrap();
    tokio::spawn(gateway.serve());
    (addr, sessions)
}

fn join(session_id: &str, participant_id: &str) -> ClientFrame {
    ClientFrame::Join {
        session_id: session_id.to_string(),
        participant_id: participant_id.to_string(),
    }
}

#[tokio::test]
async fn join_replies_with_snapshot() {
    let (addr, sessions) = boot("").await;
    sessions.open_with_content("main.rs", "fn main() {}");

    let mut alice = Client::connect(addr).await;
    alice.send(&join("main.rs", "alice")).await;

    match alice.recv().await.unwrap() {
        ServerFrame::Snapshot {
            session_id,
            content,
            revision,
        } => {
            assert_eq!(session_id, "main.rs");
            assert_eq!(content, "fn main() {}");
            assert_eq!(revision, 0);
        }
        other => panic!("expected snapshot, got {other:?}"),
    }
}

#[tokio::test]
async fn edits_broadcast_to_other_participants() {
    let (addr, sessions) = boot("").await;
    sessions.open_with_content("main.rs", "abc");

    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;
    alice.send(&join("main.rs", "alice")).await;
    alice.recv().await.unwrap();
    bob.send(&join("main.rs", "bob")).await;
    bob.recv().await.unwrap();

    alice
        .send(&ClientFrame::Edit {
            session_id: "main.rs".to_string(),
            base_revision: 0,
            edits: vec![wren::ot::Edit::insert(3, "!")],
        })
        .await;

    match bob.recv().await.unwrap() {
        ServerFrame::Applied {
            session_id,
            origin,
            revision,
            edits,
        } => {
            assert_eq!(session_id, "main.rs");
            assert_eq!(String::from(origin), "alice");
            assert_eq!(revision, 1);
            assert_eq!(edits, vec![wren::ot::Edit::insert(3, "!")]);
        }
        other => panic!("expected applied, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_frame_closes_only_that_connection() {
    let (addr, sessions) = boot("").await;
    sessions.open_with_content("main.rs", "abc");

    let mut alice = Client::connect(addr).await;
    alice.send(&join("main.rs", "alice")).await;
    alice.recv().await.unwrap();

    let mut rogue = Client::connect(addr).await;
    rogue.send_raw("{this is not json").await;
    match rogue.recv().await.unwrap() {
        ServerFrame::Error { .. } => {}
        other => panic!("expected error frame, got {other:?}"),
    }
    // The server closes the rogue connection after the error frame.
    assert!(rogue.recv().await.is_none());

    // Alice is unaffected: a later join still answers.
    let mut carol = Client::connect(addr).await;
    carol.send(&join("main.rs", "carol")).await;
    assert!(matches!(
        carol.recv().await.unwrap(),
        ServerFrame::Snapshot { .. }
    ));
}

#[tokio::test]
async fn stale_revision_edit_is_fatal_for_the_connection() {
    let (addr, sessions) = boot("").await;
    sessions.open_with_content("main.rs", "abc");

    let mut alice = Client::connect(addr).await;
    alice.send(&join("main.rs", "alice")).await;
    alice.recv().await.unwrap();

    // Revision 9 was never issued.
    alice
        .send(&ClientFrame::Edit {
            session_id: "main.rs".to_string(),
            base_revision: 9,
            edits: vec![wren::ot::Edit::insert(0, "x")],
        })
        .await;

    match alice.recv().await.unwrap() {
        ServerFrame::Error { message } => assert!(message.contains("unknown revision")),
        other => panic!("expected error frame, got {other:?}"),
    }
    assert!(alice.recv().await.is_none());
}

#[tokio::test]
async fn diagnostic_drives_a_fix_into_the_shared_document() {
    let (addr, sessions) = boot("").await;
    sessions.open_with_content("Main.java", "import java.util.List;\nclass Main {}\n");

    let mut alice = Client::connect(addr).await;
    alice.send(&join("Main.java", "alice")).await;
    alice.recv().await.unwrap();

    // The diagnostics collaborator pushes; any connection may carry it.
    alice
        .send(&ClientFrame::Diagnostic {
            file_id: "Main.java".to_string(),
            message: "unused import java.util.List".to_string(),
            range: (0, 22),
            language: "java".to_string(),
        })
        .await;

    // The fix arrives as a normal applied operation with the synthetic
    // origin, the same path as a human edit.
    match alice.recv().await.unwrap() {
        ServerFrame::Applied { origin, .. } => {
            assert_eq!(String::from(origin), "fixloop");
        }
        other => panic!("expected applied, got {other:?}"),
    }

    let (content, _) = sessions
        .get("Main.java")
        .unwrap()
        .snapshot()
        .await
        .unwrap();
    assert_eq!(content, "\nclass Main {}\n");
}
