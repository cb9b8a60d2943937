//! Process-wide registry of supervised sessions.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::session::{InteractiveSession, SessionStatus, SpawnConfig, StoppedSession};
use crate::{SessionError, SessionResult};

/// Owns every live [`InteractiveSession`]; all lookups go through here.
///
/// Reader tasks never hold a reference back into the registry, so removing a
/// session drops it as soon as the last caller lets go.
pub struct SessionSupervisor {
    sessions: Arc<DashMap<String, Arc<InteractiveSession>>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Spawn a new child session and register it under a fresh id.
    pub fn start(&self, config: SpawnConfig) -> SessionResult<Arc<InteractiveSession>> {
        let id = format!("sess-{}", &Uuid::new_v4().simple().to_string()[..12]);
        self.start_with_id(id, config)
    }

    /// Spawn a new child session under a caller-chosen id.
    pub fn start_with_id(
        &self,
        id: String,
        config: SpawnConfig,
    ) -> SessionResult<Arc<InteractiveSession>> {
        if self.sessions.contains_key(&id) {
            return Err(SessionError::AlreadyExists(id));
        }

        let session = Arc::new(InteractiveSession::spawn(id.clone(), config)?);
        self.sessions.insert(id, session.clone());
        Ok(session)
    }

    /// Look up a session by id.
    pub fn get(&self, id: &str) -> SessionResult<Arc<InteractiveSession>> {
        self.sessions
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Status of every registered session.
    pub fn list(&self) -> Vec<SessionStatus> {
        self.sessions
            .iter()
            .map(|entry| entry.value().status())
            .collect()
    }

    /// Stop a session and remove it from the registry.
    pub async fn stop(&self, id: &str) -> SessionResult<StoppedSession> {
        let session = self.get(id)?;
        let stopped = session.stop().await?;
        self.sessions.remove(id);
        Ok(stopped)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_unknown_session() {
        let supervisor = SessionSupervisor::new();
        assert!(matches!(
            supervisor.get("sess-missing"),
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_unknown_session() {
        let supervisor = SessionSupervisor::new();
        assert!(matches!(
            supervisor.stop("sess-missing").await,
            Err(SessionError::NotFound(_))
        ));
    }

    // Spawning real PTYs is covered by the `session_status` smoke test below,
    // which shells out to `sh` and is cheap on any unix host.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_and_stop_shell() {
        let supervisor = SessionSupervisor::new();
        let config = SpawnConfig::new("sh").working_dir("/tmp");

        let session = match supervisor.start(config) {
            Ok(s) => s,
            // Restricted sandboxes may refuse PTY allocation; nothing to test.
            Err(SessionError::Pty(_)) => return,
            Err(e) => panic!("unexpected spawn error: {e}"),
        };

        assert_eq!(supervisor.len(), 1);
        let status = session.status();
        assert_eq!(status.messages_sent, 0);

        let stopped = supervisor.stop(&session.id).await.unwrap();
        assert_eq!(stopped.id, session.id);
        assert!(supervisor.is_empty());
    }
}
