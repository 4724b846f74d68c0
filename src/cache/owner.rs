// Cache owner task
//
// The pattern cache runs behind a single-owner Tokio task reachable only
// through a request channel; callers never touch the map directly, so no
// locking is needed. Mutations are persisted best-effort after each change.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use super::store::{CacheStats, CachedFix, PatternCache};

enum CacheRequest {
    Lookup {
        key: String,
        reply: oneshot::Sender<Option<CachedFix>>,
    },
    Record {
        key: String,
        fix: CachedFix,
        reply: oneshot::Sender<()>,
    },
    Penalize {
        key: String,
        reply: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<CacheStats>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap-to-clone handle to the cache owner task.
#[derive(Clone)]
pub struct CacheHandle {
    tx: mpsc::UnboundedSender<CacheRequest>,
}

impl CacheHandle {
    /// Spawn the owner task around a cache. When `persist_path` is set,
    /// every mutation is flushed to it; write failures are logged, never
    /// propagated.
    pub fn spawn(cache: PatternCache, persist_path: Option<PathBuf>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(cache, persist_path, rx));
        Self { tx }
    }

    pub async fn lookup(&self, key: &str) -> Result<Option<CachedFix>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CacheRequest::Lookup {
                key: key.to_string(),
                reply,
            })
            .ok()
            .context("Pattern cache task is gone")?;
        rx.await.context("Pattern cache task dropped the request")
    }

    pub async fn record(&self, key: String, fix: CachedFix) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CacheRequest::Record { key, fix, reply })
            .ok()
            .context("Pattern cache task is gone")?;
        rx.await.context("Pattern cache task dropped the request")
    }

    pub async fn penalize(&self, key: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CacheRequest::Penalize {
                key: key.to_string(),
                reply,
            })
            .ok()
            .context("Pattern cache task is gone")?;
        rx.await.context("Pattern cache task dropped the request")
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CacheRequest::Stats { reply })
            .ok()
            .context("Pattern cache task is gone")?;
        rx.await.context("Pattern cache task dropped the request")
    }

    pub async fn clear(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CacheRequest::Clear { reply })
            .ok()
            .context("Pattern cache task is gone")?;
        rx.await.context("Pattern cache task dropped the request")
    }
}

async fn run(
    mut cache: PatternCache,
    persist_path: Option<PathBuf>,
    mut rx: mpsc::UnboundedReceiver<CacheRequest>,
) {
    while let Some(request) = rx.recv().await {
        let mut dirty = false;
        match request {
            CacheRequest::Lookup { key, reply } => {
                let _ = reply.send(cache.lookup(&key));
            }
            CacheRequest::Record { key, fix, reply } => {
                cache.record(key, fix);
                dirty = true;
                let _ = reply.send(());
            }
            CacheRequest::Penalize { key, reply } => {
                cache.penalize(&key);
                dirty = true;
                let _ = reply.send(());
            }
            CacheRequest::Stats { reply } => {
                let _ = reply.send(cache.stats());
            }
            CacheRequest::Clear { reply } => {
                cache.clear();
                dirty = true;
                let _ = reply.send(());
            }
        }

        if dirty {
            if let Some(path) = &persist_path {
                if let Err(e) = cache.save_to_file(path) {
                    warn!(path = %path.display(), error = %e, "Failed to persist pattern cache");
                }
            }
        }
    }
}
