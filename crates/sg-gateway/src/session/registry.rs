//! Process-wide table of live sessions

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use sg_core::error::SessionError;
use sg_core::{ConnectionId, SessionId, UserId};

/// A live session as seen by the registry
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Owning user
    pub user: UserId,
    /// Connection the session's channel belongs to
    pub connection: ConnectionId,
    /// When the session was admitted
    pub started_at: Instant,
}

/// Allocates session ids and tracks live sessions
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionEntry>,
    next_id: AtomicU32,
    active: AtomicU32,
    max_sessions: Option<u32>,
}

impl SessionRegistry {
    /// Create a registry with an optional cap on live sessions
    pub fn new(max_sessions: Option<u32>) -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU32::new(1),
            active: AtomicU32::new(0),
            max_sessions,
        }
    }

    /// Admit a new session
    ///
    /// The returned guard removes the entry when dropped.
    pub fn register(
        self: &Arc<Self>,
        user: UserId,
        connection: ConnectionId,
    ) -> Result<SessionRegistration, SessionError> {
        let max = self.max_sessions.unwrap_or(u32::MAX);
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .map_err(|_| SessionError::LimitExceeded(max))?;

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions.insert(
            id,
            SessionEntry {
                user,
                connection,
                started_at: Instant::now(),
            },
        );

        Ok(SessionRegistration {
            id,
            registry: Arc::clone(self),
        })
    }

    /// Look up a live session
    pub fn get(&self, id: SessionId) -> Option<SessionEntry> {
        self.sessions.get(&id).map(|entry| entry.clone())
    }

    /// Live sessions belonging to one connection
    pub fn count_for(&self, connection: ConnectionId) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.connection == connection)
            .count()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn remove(&self, id: SessionId) {
        if self.sessions.remove(&id).is_some() {
            self.active.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Keeps a session registered for as long as it lives
#[derive(Debug)]
pub struct SessionRegistration {
    id: SessionId,
    registry: Arc<SessionRegistry>,
}

impl SessionRegistration {
    /// The allocated session id
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionRegistration {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let registry = Arc::new(SessionRegistry::default());
        let a = registry.register("alice".into(), ConnectionId(1)).unwrap();
        let b = registry.register("alice".into(), ConnectionId(1)).unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.count_for(ConnectionId(1)), 2);
        assert_eq!(registry.count_for(ConnectionId(2)), 0);
    }

    #[test]
    fn test_drop_unregisters() {
        let registry = Arc::new(SessionRegistry::default());
        let registration = registry.register("bob".into(), ConnectionId(7)).unwrap();
        let id = registration.id();
        assert_eq!(registry.get(id).unwrap().user, UserId::from("bob"));

        drop(registration);
        assert!(registry.get(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_limit_frees_slot_on_drop() {
        let registry = Arc::new(SessionRegistry::new(Some(1)));
        let first = registry.register("alice".into(), ConnectionId(1)).unwrap();

        let err = registry
            .register("alice".into(), ConnectionId(2))
            .unwrap_err();
        assert!(matches!(err, SessionError::LimitExceeded(1)));

        drop(first);
        assert!(registry.register("alice".into(), ConnectionId(2)).is_ok());
    }
}
