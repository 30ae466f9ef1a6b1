//! Bounded session manager.
//!
//! Holds at most `max_sessions` live sessions; creating one past the bound
//! evicts the least-recently-used. Sessions idle past the timeout are
//! evicted on the next operation. The manager's own mutex is only held for
//! map operations; turn execution happens outside it, serialized per
//! session by the session's own async lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use sov_agent::{Agent, CancelToken, TurnResult};
use sov_domain::config::SessionsConfig;
use sov_domain::error::{Error, Result};

/// Builds a fresh agent for a new session.
pub type AgentFactory = dyn Fn() -> Agent + Send + Sync;

/// One live session.
pub struct SessionHandle {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Turn execution is exclusive per session; concurrent `run_turn` on
    /// the same session serializes here.
    agent: tokio::sync::Mutex<Agent>,
    last_access: Mutex<Instant>,
    cancel: Mutex<CancelToken>,
}

impl SessionHandle {
    fn new(id: String, agent: Agent) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            agent: tokio::sync::Mutex::new(agent),
            last_access: Mutex::new(Instant::now()),
            cancel: Mutex::new(CancelToken::new()),
        }
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    /// Run one turn. A fresh cancel token is installed for the turn so
    /// `stop` affects only the in-flight request.
    pub async fn run_turn(&self, user_input: &str) -> TurnResult {
        let token = CancelToken::new();
        *self.cancel.lock() = token.clone();
        self.touch();

        let mut agent = self.agent.lock().await;
        let result = agent.run_turn(user_input, &token).await;
        self.touch();
        result
    }

    /// Request cancellation of the in-flight turn, if any.
    pub fn stop(&self) {
        self.cancel.lock().cancel();
    }

    pub async fn history_len(&self) -> usize {
        self.agent.lock().await.history().len()
    }

    pub async fn metrics(&self) -> sov_agent::metrics::AgentMetrics {
        self.agent.lock().await.metrics()
    }

    pub async fn reset(&self) {
        self.agent.lock().await.reset();
    }
}

pub struct SessionManager {
    max_sessions: usize,
    timeout: Duration,
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
    factory: Box<AgentFactory>,
}

impl SessionManager {
    pub fn new(config: &SessionsConfig, factory: Box<AgentFactory>) -> Self {
        Self {
            max_sessions: config.max_sessions,
            timeout: Duration::from_secs(config.timeout_secs),
            sessions: Mutex::new(HashMap::new()),
            factory,
        }
    }

    /// Create a new session, evicting the least-recently-used one when the
    /// bound is reached.
    pub fn create_session(&self) -> Arc<SessionHandle> {
        // Build the agent outside the lock.
        let id = uuid::Uuid::new_v4().to_string();
        let handle = Arc::new(SessionHandle::new(id.clone(), (self.factory)()));

        let mut sessions = self.sessions.lock();
        Self::evict_expired(&mut sessions, self.timeout);

        if sessions.len() >= self.max_sessions {
            if let Some(lru) = sessions
                .iter()
                .max_by_key(|(_, h)| h.idle_for())
                .map(|(id, _)| id.clone())
            {
                tracing::info!(session = %lru, "evicting least-recently-used session");
                sessions.remove(&lru);
            }
        }

        tracing::info!(session = %id, "created session");
        sessions.insert(id, handle.clone());
        handle
    }

    /// Look up a session, refreshing its last-access time.
    pub fn get_session(&self, id: &str) -> Option<Arc<SessionHandle>> {
        let mut sessions = self.sessions.lock();
        Self::evict_expired(&mut sessions, self.timeout);
        let handle = sessions.get(id).cloned();
        if let Some(handle) = &handle {
            handle.touch();
        }
        handle
    }

    /// Existing session when the id matches, otherwise a new one.
    pub fn get_or_create_session(&self, id: Option<&str>) -> Arc<SessionHandle> {
        if let Some(id) = id {
            if let Some(handle) = self.get_session(id) {
                return handle;
            }
        }
        self.create_session()
    }

    pub fn delete_session(&self, id: &str) -> bool {
        let removed = self.sessions.lock().remove(id);
        if let Some(handle) = &removed {
            handle.stop();
        }
        removed.is_some()
    }

    /// Clear conversation state while keeping the session alive.
    pub async fn reset_session(&self, id: &str) -> Result<()> {
        let handle = self
            .get_session(id)
            .ok_or_else(|| Error::Session(format!("unknown session: {id}")))?;
        handle.reset().await;
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        let mut sessions = self.sessions.lock();
        Self::evict_expired(&mut sessions, self.timeout);
        sessions.len()
    }

    /// Stop all in-flight turns and drop every session.
    pub fn close_all(&self) {
        let mut sessions = self.sessions.lock();
        for handle in sessions.values() {
            handle.stop();
        }
        sessions.clear();
    }

    fn evict_expired(sessions: &mut HashMap<String, Arc<SessionHandle>>, timeout: Duration) {
        sessions.retain(|id, handle| {
            let keep = handle.idle_for() <= timeout;
            if !keep {
                tracing::info!(session = %id, "session expired");
            }
            keep
        });
    }
}
