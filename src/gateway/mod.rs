// Transport gateway
//
// External-facing message pump: accepts one TCP connection per participant,
// decodes inbound JSON frames into operations and diagnostic events, and
// carries outbound broadcasts. The gateway owns no document state; it only
// talks to the session manager and the fix loop over their handles.

mod connection;
pub mod protocol;

use anyhow::{Context, Result};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::fixloop::{FixEvent, FixLoopHandle};
use crate::metrics::MetricsLogger;
use crate::session::SessionManager;

use protocol::ServerFrame;

/// Live connections, keyed by an internal id. Fix-loop events that must
/// reach the IDE collaborator fan out over every sink here.
pub(crate) type ConnectionRegistry = Arc<DashMap<u64, mpsc::UnboundedSender<ServerFrame>>>;

pub struct Gateway {
    listener: TcpListener,
    sessions: SessionManager,
    fixloop: FixLoopHandle,
    fix_events: mpsc::UnboundedReceiver<FixEvent>,
    connections: ConnectionRegistry,
    metrics: Option<MetricsLogger>,
}

impl Gateway {
    /// Bind the listen socket. The daemon is not serving yet; call
    /// [`Gateway::serve`] to start the accept loop.
    pub async fn bind(
        bind_address: &str,
        sessions: SessionManager,
        fixloop: FixLoopHandle,
        fix_events: mpsc::UnboundedReceiver<FixEvent>,
        metrics: Option<MetricsLogger>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("Failed to bind {bind_address}"))?;
        Ok(Self {
            listener,
            sessions,
            fixloop,
            fix_events,
            connections: Arc::new(DashMap::new()),
            metrics,
        })
    }

    /// The actually bound address (useful with a `:0` port).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read local address")
    }

    /// Run the accept loop until the task is cancelled.
    pub async fn serve(self) -> Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, "Gateway listening");

        tokio::spawn(forward_fix_events(
            self.fix_events,
            Arc::clone(&self.connections),
        ));

        let next_conn_id = AtomicU64::new(0);
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .context("Failed to accept connection")?;
            let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
            debug!(%peer, conn_id, "Accepted connection");
            tokio::spawn(connection::handle_connection(
                stream,
                peer,
                conn_id,
                self.sessions.clone(),
                self.fixloop.clone(),
                Arc::clone(&self.connections),
                self.metrics.clone(),
            ));
        }
    }
}

/// Surface fix-loop terminal events. Abandoned diagnostics go out to every
/// connection as `Unresolved`, unchanged. The IDE collaborator decides how
/// to present them.
async fn forward_fix_events(
    mut fix_events: mpsc::UnboundedReceiver<FixEvent>,
    connections: ConnectionRegistry,
) {
    while let Some(event) = fix_events.recv().await {
        match event {
            FixEvent::Resolved {
                file_id,
                attempts,
                from_cache,
            } => {
                debug!(file = %file_id, attempts, from_cache, "Fix resolved");
            }
            FixEvent::Unresolved(diagnostic) => {
                let frame = ServerFrame::Unresolved {
                    file_id: diagnostic.file_id,
                    message: diagnostic.message,
                    range: diagnostic.range,
                    language: diagnostic.language,
                };
                for entry in connections.iter() {
                    let _ = entry.value().send(frame.clone());
                }
            }
        }
    }
}
