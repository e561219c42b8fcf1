//! Session Registry
//!
//! Tracks the live sessions of one bridge. It is never used to route messages;
//! it exists for introspection and to reach every session at shutdown.
//!
//! All operations take a single mutex, held only for the map update or the
//! snapshot copy.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

/// Process-unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registry entry for one live session
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    peer: SocketAddr,
    connected_at: Instant,
    close: Arc<Notify>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Ask the session to close. The request is remembered if the session is
    /// not currently waiting for it.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Resolves once `close` has been called
    pub(crate) async fn closed(&self) {
        self.close.notified().await;
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}

/// The set of live sessions
#[derive(Default)]
pub struct Registry {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    next_id: AtomicU64,
    emptied: Notify,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session for `peer` and return its handle
    pub fn connect(&self, peer: SocketAddr) -> SessionHandle {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let handle = SessionHandle {
            id,
            peer,
            connected_at: Instant::now(),
            close: Arc::new(Notify::new()),
        };
        self.sessions.lock().insert(id, handle.clone());
        trace!(session = %id, peer = %peer, "Session registered");
        handle
    }

    /// Remove a session. Returns false if it was already absent.
    pub fn disconnect(&self, id: SessionId) -> bool {
        let (removed, now_empty) = {
            let mut sessions = self.sessions.lock();
            let removed = sessions.remove(&id).is_some();
            (removed, sessions.is_empty())
        };
        if removed {
            trace!(session = %id, "Session deregistered");
            if now_empty {
                self.emptied.notify_waiters();
            }
        }
        removed
    }

    /// Register a session that deregisters itself when the returned guard
    /// is dropped, including during unwinding.
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> Registration {
        let handle = self.connect(peer);
        Registration {
            registry: self.clone(),
            handle,
        }
    }

    /// Snapshot of all live sessions
    pub fn enumerate(&self) -> Vec<SessionHandle> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.lock().get(&id).cloned()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Signal every live session to close. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        let sessions = self.enumerate();
        for handle in &sessions {
            handle.close();
        }
        sessions.len()
    }

    /// Wait until no session is registered. Returns false on timeout.
    pub async fn wait_empty(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let emptied = self.emptied.notified();
            tokio::pin!(emptied);
            emptied.as_mut().enable();
            if self.is_empty() {
                return true;
            }
            if tokio::time::timeout_at(deadline, emptied).await.is_err() {
                return self.is_empty();
            }
        }
    }
}

/// Keeps a session registered for as long as it lives
pub struct Registration {
    registry: Arc<Registry>,
    handle: SessionHandle,
}

impl Registration {
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn id(&self) -> SessionId {
        self.handle.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.disconnect(self.handle.id);
    }
}

#[cfg(test)]
mod tests;
