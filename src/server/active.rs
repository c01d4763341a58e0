//! Active connection set, used to enumerate and close live workers on shutdown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Entry {
    peer: SocketAddr,
    close: CancellationToken,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Mutex<HashMap<u64, Entry>>,
    next_id: AtomicU64,
}

/// Concurrent registry of live connection workers.
///
/// Written by the accept loop, removed from by every worker on exit.
#[derive(Debug, Clone, Default)]
pub struct ActiveConnections {
    inner: Arc<Inner>,
}

impl ActiveConnections {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u64, Entry>> {
        self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a new connection. Dropping the returned guard removes it again.
    pub(crate) fn register(&self, peer: SocketAddr) -> ActiveGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let close = CancellationToken::new();
        self.entries().insert(
            id,
            Entry {
                peer,
                close: close.clone(),
            },
        );
        ActiveGuard {
            id,
            close,
            set: self.clone(),
        }
    }

    /// Get count of live connections
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Peer addresses of live connections.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.entries().values().map(|e| e.peer).collect()
    }

    /// Signal every tracked connection to close. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        let entries = self.entries();
        for entry in entries.values() {
            entry.close.cancel();
        }
        entries.len()
    }
}

/// Membership of one worker in the active set.
#[derive(Debug)]
pub(crate) struct ActiveGuard {
    id: u64,
    close: CancellationToken,
    set: ActiveConnections,
}

impl ActiveGuard {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Token cancelled when the server wants this connection closed.
    pub(crate) fn close_token(&self) -> CancellationToken {
        self.close.clone()
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.set.entries().remove(&self.id);
    }
}
