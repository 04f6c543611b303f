//! Per-session conversation state and the in-process session registry

use crate::memory::store::{ConversationHistory, ConversationTurn};
use crate::models::{BasSummary, Verbosity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    HasReport,
}

/// Everything one session remembers. Owned by the caller and passed into
/// every controller call; there is no ambient "current session".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    history: ConversationHistory,
    last_report: Option<BasSummary>,
    verbosity: Verbosity,
}

impl ConversationState {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            created_at: Utc::now(),
            history: ConversationHistory::new(),
            last_report: None,
            verbosity: Verbosity::default(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        if self.last_report.is_some() {
            SessionPhase::HasReport
        } else {
            SessionPhase::Idle
        }
    }

    pub fn last_report(&self) -> Option<&BasSummary> {
        self.last_report.as_ref()
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub(crate) fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    /// Store the finished turn, and the new report if the turn produced one.
    /// Called once per turn, after every fallible step has resolved.
    pub(crate) fn commit_turn(&mut self, turn: ConversationTurn, report: Option<BasSummary>) {
        if let Some(report) = report {
            self.last_report = Some(report);
        }
        if let Some(evicted) = self.history.push(turn) {
            debug!(
                session_id = %self.session_id,
                evicted_at = %evicted.timestamp,
                "History full, evicted oldest turn"
            );
        }
    }
}

/// Idle time after which an unused session is dropped.
pub const DEFAULT_SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

struct SessionEntry {
    state: Arc<Mutex<ConversationState>>,
    last_active: Instant,
}

impl SessionEntry {
    /// Some caller still holds the state, e.g. a turn in flight.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.state) > 1
    }
}

/// Registry of live sessions.
///
/// Each session sits behind its own async mutex; holding it for a whole turn
/// keeps a session to one in-flight turn while other sessions proceed.
/// Sessions idle longer than the TTL are swept on the next lookup.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
    idle_ttl: Duration,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_idle_ttl(DEFAULT_SESSION_IDLE_TTL)
    }

    pub fn with_idle_ttl(idle_ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle_ttl,
        }
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    pub async fn get_or_create(&self, session_id: Uuid) -> Arc<Mutex<ConversationState>> {
        let mut locked = self.sessions.write().await;
        let now = Instant::now();

        let before = locked.len();
        locked.retain(|id, entry| {
            *id == session_id || entry.in_use() || now.duration_since(entry.last_active) < self.idle_ttl
        });
        let expired = before - locked.len();
        if expired > 0 {
            debug!(expired, remaining = locked.len(), "Expired idle sessions");
        }

        let entry = locked.entry(session_id).or_insert_with(|| SessionEntry {
            state: Arc::new(Mutex::new(ConversationState::new(session_id))),
            last_active: now,
        });
        entry.last_active = now;
        entry.state.clone()
    }

    /// End a session and discard its state.
    pub async fn end(&self, session_id: Uuid) -> bool {
        self.sessions.write().await.remove(&session_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InteractionMode;
    use rust_decimal_macros::dec;

    #[test]
    fn test_phase_follows_last_report() {
        let mut state = ConversationState::new(Uuid::new_v4());
        assert_eq!(state.phase(), SessionPhase::Idle);

        state.commit_turn(ConversationTurn::new("hi", "hello", InteractionMode::Chat), None);
        assert_eq!(state.phase(), SessionPhase::Idle);
        assert_eq!(state.history().len(), 1);

        let report = BasSummary::from_totals(dec!(0), dec!(42.50));
        state.commit_turn(
            ConversationTurn::new("invoice", "refund", InteractionMode::Invoice),
            Some(report),
        );
        assert_eq!(state.phase(), SessionPhase::HasReport);
        assert_eq!(state.last_report(), Some(&report));

        state.commit_turn(ConversationTurn::new("thanks", "np", InteractionMode::Chat), None);
        assert_eq!(state.last_report(), Some(&report));
    }

    #[tokio::test]
    async fn test_store_returns_same_session() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();

        let first = store.get_or_create(id).await;
        first.lock().await.set_verbosity(Verbosity::Detailed);

        let second = store.get_or_create(id).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.lock().await.verbosity(), Verbosity::Detailed);
        assert_eq!(store.len().await, 1);

        assert!(store.end(id).await);
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_store_from_sync_code() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();

        let state = tokio_test::block_on(store.get_or_create(id));
        assert_eq!(tokio_test::block_on(state.lock()).session_id, id);
        assert_eq!(tokio_test::block_on(store.len()), 1);
    }

    #[tokio::test]
    async fn test_idle_sessions_expire_on_next_lookup() {
        let store = SessionStore::with_idle_ttl(Duration::ZERO);

        for _ in 0..50 {
            let _ = store.get_or_create(Uuid::new_v4()).await;
        }
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_session_in_use_is_never_expired() {
        let store = SessionStore::with_idle_ttl(Duration::ZERO);
        let busy_id = Uuid::new_v4();

        let busy = store.get_or_create(busy_id).await;
        let _guard = busy.lock().await;
        let _ = store.get_or_create(Uuid::new_v4()).await;

        assert_eq!(store.len().await, 2);
        let again = store.get_or_create(busy_id).await;
        assert!(Arc::ptr_eq(&busy, &again));
    }

    #[tokio::test]
    async fn test_active_sessions_survive_default_ttl() {
        let store = SessionStore::new();
        assert_eq!(store.idle_ttl(), DEFAULT_SESSION_IDLE_TTL);

        let _ = store.get_or_create(Uuid::new_v4()).await;
        let _ = store.get_or_create(Uuid::new_v4()).await;
        assert_eq!(store.len().await, 2);
    }
}
