//! Distance history scoping
//!
//! `Global` shares one history across every request. `PerSession` keys
//! histories by the `x-session-id` request header; the session map is capped
//! and idle sessions expire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use affect::{DistanceHistory, StressConfig};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub const SESSION_HEADER: &str = "x-session-id";
pub const ANONYMOUS_SESSION: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryScope {
    #[default]
    Global,
    PerSession,
}

pub type SharedHistory = Arc<Mutex<DistanceHistory>>;

/// Snapshot for the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HistoryStats {
    pub scope: HistoryScope,
    pub sessions: usize,
    pub observations: usize,
}

/// Bounds on the per-session history map
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// At least 1
    pub max_sessions: usize,
    /// None keeps idle sessions until evicted by the cap
    pub idle_ttl: Option<Duration>,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
            idle_ttl: Some(Duration::from_secs(3600)),
        }
    }
}

struct SessionEntry {
    history: SharedHistory,
    last_used: Instant,
}

/// Hands out the history a request scores against
pub struct HistoryRegistry {
    scope: HistoryScope,
    config: StressConfig,
    limits: SessionLimits,
    global: SharedHistory,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl HistoryRegistry {
    pub fn new(scope: HistoryScope, config: StressConfig, limits: SessionLimits) -> Self {
        Self {
            scope,
            global: Arc::new(Mutex::new(DistanceHistory::with_config(&config))),
            config,
            limits,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// History for a request, creating the session entry on first use.
    ///
    /// A new session first drops expired entries, then evicts the least
    /// recently used one while the map is full.
    pub async fn history_for(&self, headers: &HeaderMap) -> SharedHistory {
        match self.scope {
            HistoryScope::Global => self.global.clone(),
            HistoryScope::PerSession => {
                let session = session_id(headers);
                let now = Instant::now();
                let mut sessions = self.sessions.lock().await;

                if let Some(entry) = sessions.get_mut(session) {
                    if !self.is_expired(entry, now) {
                        entry.last_used = now;
                        return entry.history.clone();
                    }
                }

                if let Some(ttl) = self.limits.idle_ttl {
                    let before = sessions.len();
                    sessions.retain(|_, entry| now.duration_since(entry.last_used) < ttl);
                    let expired = before - sessions.len();
                    if expired > 0 {
                        debug!("Expired {} idle scoring sessions", expired);
                        metrics::counter!("affect_sessions_evicted_total", "reason" => "idle").increment(expired as u64);
                    }
                }
                while sessions.len() >= self.limits.max_sessions.max(1) {
                    let oldest = sessions
                        .iter()
                        .min_by_key(|(_, entry)| entry.last_used)
                        .map(|(id, _)| id.clone());
                    let Some(oldest) = oldest else { break };
                    debug!("Evicting least recently used session {}", oldest);
                    sessions.remove(&oldest);
                    metrics::counter!("affect_sessions_evicted_total", "reason" => "capacity").increment(1);
                }

                debug!("New scoring session {}", session);
                let history = Arc::new(Mutex::new(DistanceHistory::with_config(&self.config)));
                sessions.insert(
                    session.to_string(),
                    SessionEntry {
                        history: history.clone(),
                        last_used: now,
                    },
                );
                history
            }
        }
    }

    fn is_expired(&self, entry: &SessionEntry, now: Instant) -> bool {
        self.limits
            .idle_ttl
            .is_some_and(|ttl| now.duration_since(entry.last_used) >= ttl)
    }

    pub async fn stats(&self) -> HistoryStats {
        let (sessions, observations) = match self.scope {
            HistoryScope::Global => (1, self.global.lock().await.len()),
            HistoryScope::PerSession => {
                let histories: Vec<SharedHistory> = self
                    .sessions
                    .lock()
                    .await
                    .values()
                    .map(|entry| entry.history.clone())
                    .collect();
                let mut observations = 0;
                for history in &histories {
                    observations += history.lock().await.len();
                }
                (histories.len(), observations)
            }
        };

        HistoryStats {
            scope: self.scope,
            sessions,
            observations,
        }
    }
}

/// Session identity of a request, `anonymous` when the header is absent or blank
pub fn session_id(headers: &HeaderMap) -> &str {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(ANONYMOUS_SESSION)
}
