//! Long-lived client sessions
//!
//! A session carries many sequential jobs over one connection. Its lifecycle
//! is a small state machine ([`SessionState::transition`]); the
//! [`Session`] supervisor drives it from transport events, heartbeats and
//! job completions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub use crate::session::protocol::{ClientMessage, ServerMessage};
pub use crate::session::supervisor::{CloseReason, Inbound, JobExecutor, Session};

mod protocol;
mod supervisor;

/// Identifier of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    /// Open with no job in flight
    Idle,
    /// Open with one job in flight
    Busy,
    Closing,
    Closed,
}

/// Something that happened to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake finished and the id was sent
    Opened,
    JobStarted,
    /// Job finished, failed or was cancelled
    JobFinished,
    /// Client left, heartbeat lapsed or idle ceiling reached
    CloseRequested,
    /// Channel and in-flight job are gone
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub event: SessionEvent,
}

impl SessionState {
    /// Next state after `event`, or an error if the event is not allowed here
    pub fn transition(self, event: SessionEvent) -> Result<SessionState, InvalidTransition> {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (S::Connecting, E::Opened) => Ok(S::Idle),
            (S::Idle, E::JobStarted) => Ok(S::Busy),
            (S::Busy, E::JobFinished) => Ok(S::Idle),
            (S::Connecting | S::Idle | S::Busy, E::CloseRequested) => Ok(S::Closing),
            (S::Closing, E::Closed) => Ok(S::Closed),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }

    /// Whether the session accepts messages
    pub fn is_open(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Busy)
    }
}

/// Public view of a live session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: SessionState,
    pub connected_at: DateTime<Utc>,
}

/// Live sessions, shared between the transport and the supervisors
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, SessionInfo>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: SessionId) {
        let info = SessionInfo {
            id,
            state: SessionState::Connecting,
            connected_at: Utc::now(),
        };
        self.sessions.write().await.insert(id, info);
    }

    pub async fn set_state(&self, id: SessionId, state: SessionState) {
        if let Some(info) = self.sessions.write().await.get_mut(&id) {
            info.state = state;
        }
    }

    pub async fn remove(&self, id: SessionId) {
        self.sessions.write().await.remove(&id);
    }

    pub async fn get(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Snapshot of every live session, oldest first
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|info| info.connected_at);
        sessions
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let state = SessionState::Connecting
            .transition(SessionEvent::Opened)
            .unwrap();
        assert_eq!(state, SessionState::Idle);
        let state = state.transition(SessionEvent::JobStarted).unwrap();
        assert_eq!(state, SessionState::Busy);
        let state = state.transition(SessionEvent::JobFinished).unwrap();
        assert_eq!(state, SessionState::Idle);
        let state = state.transition(SessionEvent::CloseRequested).unwrap();
        assert_eq!(state, SessionState::Closing);
        let state = state.transition(SessionEvent::Closed).unwrap();
        assert_eq!(state, SessionState::Closed);
    }

    #[test]
    fn second_job_while_busy_is_invalid() {
        assert_eq!(
            SessionState::Busy.transition(SessionEvent::JobStarted),
            Err(InvalidTransition {
                from: SessionState::Busy,
                event: SessionEvent::JobStarted,
            })
        );
    }

    #[test]
    fn busy_session_can_close() {
        assert_eq!(
            SessionState::Busy.transition(SessionEvent::CloseRequested),
            Ok(SessionState::Closing)
        );
    }

    #[test]
    fn closed_is_terminal() {
        for event in [
            SessionEvent::Opened,
            SessionEvent::JobStarted,
            SessionEvent::JobFinished,
            SessionEvent::CloseRequested,
            SessionEvent::Closed,
        ] {
            assert!(SessionState::Closed.transition(event).is_err());
        }
    }

    #[test]
    fn only_idle_and_busy_are_open() {
        assert!(SessionState::Idle.is_open());
        assert!(SessionState::Busy.is_open());
        assert!(!SessionState::Connecting.is_open());
        assert!(!SessionState::Closing.is_open());
    }

    #[tokio::test]
    async fn registry_tracks_sessions() {
        let registry = SessionRegistry::new();
        let a = SessionId::new();
        let b = SessionId::new();
        registry.register(a).await;
        registry.register(b).await;
        assert_eq!(registry.len().await, 2);

        registry.set_state(a, SessionState::Busy).await;
        assert_eq!(registry.get(a).await.unwrap().state, SessionState::Busy);

        registry.remove(a).await;
        let live = registry.list().await;
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, b);
    }

    #[test]
    fn info_serializes_camel_case() {
        let info = SessionInfo {
            id: SessionId::new(),
            state: SessionState::Idle,
            connected_at: Utc::now(),
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["state"], "idle");
        assert!(value.get("connectedAt").is_some());
    }
}
