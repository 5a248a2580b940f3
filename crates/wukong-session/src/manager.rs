//! Session manager (C9, spec §4.9).
//!
//! Owns lightweight runtime bookkeeping — who has a session open, when they
//! last touched it, and a handle to their live agent instance — separately
//! from the full `Session` domain record the step executor and loop persist
//! through the storage adapter. Grounded in the teacher's `SessionManager`
//! (`RwLock<HashMap<String, SessionEntry>>` plus a per-user index and a
//! background sweep task), generalized to the spec's cache-backed restore
//! contract.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use wukong_foundation::{events, CacheAdapter, Error, EventBus, Result, SessionId};

fn session_cache_key(id: SessionId) -> String {
    format!("wukong:server:session:{id}")
}

fn user_index_cache_key(user_id: &str) -> String {
    format!("wukong:server:user:sessions:{user_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    Idle,
    Active,
    Paused,
    Completed,
    Failed,
    Stopped,
}

/// The record the manager persists to cache (spec §4.9: "store info
/// `{id, userId, createdAt, lastActivityAt, status=idle}`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub status: RuntimeStatus,
}

struct SessionEntry<A> {
    info: SessionInfo,
    agent: Arc<A>,
}

/// Builds a fresh agent instance for a session being created or restored.
/// A plain closure in the teacher's style rather than a trait, since the
/// only operation needed is "build one from this info".
pub type AgentFactory<A> = Arc<dyn Fn(&SessionInfo) -> A + Send + Sync>;

pub struct SessionManager<A: Send + Sync + 'static> {
    cache: Arc<dyn CacheAdapter>,
    bus: Arc<EventBus>,
    max_sessions_per_user: usize,
    restore_timeout_secs: u64,
    cleanup_interval_secs: u64,
    factory: AgentFactory<A>,
    sessions: RwLock<HashMap<SessionId, SessionEntry<A>>>,
    user_index: RwLock<HashMap<String, Vec<SessionId>>>,
}

impl<A: Send + Sync + 'static> SessionManager<A> {
    pub fn new(
        cache: Arc<dyn CacheAdapter>,
        bus: Arc<EventBus>,
        config: wukong_foundation::SessionConfig,
        factory: AgentFactory<A>,
    ) -> Self {
        Self {
            cache,
            bus,
            max_sessions_per_user: config.max_sessions_per_user,
            restore_timeout_secs: config.restore_timeout_secs,
            cleanup_interval_secs: config.cleanup_interval_secs,
            factory,
            sessions: RwLock::new(HashMap::new()),
            user_index: RwLock::new(HashMap::new()),
        }
    }

    /// `create(userId)` (spec §4.9): evict the oldest session if the
    /// per-user cap is exceeded, build a fresh agent instance, persist.
    pub async fn create(&self, user_id: &str) -> Result<(SessionId, Arc<A>)> {
        let oldest = {
            let index = self.user_index.read().unwrap();
            let sessions = self.sessions.read().unwrap();
            index.get(user_id).and_then(|ids| {
                ids.iter()
                    .filter_map(|id| sessions.get(id).map(|e| (*id, e.info.created_at)))
                    .min_by_key(|(_, created_at)| *created_at)
                    .map(|(id, _)| id)
            })
        };
        if let Some(oldest_id) = oldest {
            let over_cap = {
                let index = self.user_index.read().unwrap();
                index.get(user_id).map(|ids| ids.len() >= self.max_sessions_per_user).unwrap_or(false)
            };
            if over_cap {
                info!(%user_id, session = %oldest_id, "per-user session cap reached, evicting oldest");
                self.destroy(oldest_id).await?;
            }
        }

        let now = Utc::now();
        let id = SessionId::new();
        let info = SessionInfo { id, user_id: user_id.to_string(), created_at: now, last_activity_at: now, status: RuntimeStatus::Idle };
        let agent = Arc::new((self.factory)(&info));

        self.sessions.write().unwrap().insert(id, SessionEntry { info: info.clone(), agent: agent.clone() });
        self.user_index.write().unwrap().entry(user_id.to_string()).or_default().push(id);

        self.persist(&info).await?;
        self.persist_user_index(user_id).await?;
        self.bus.publish(events::session::created(&id.to_string())).await;
        Ok((id, agent))
    }

    /// `get(sessionId)` (spec §4.9): refresh `lastActivityAt`.
    pub async fn get(&self, session_id: SessionId) -> Result<Option<Arc<A>>> {
        let updated_info = {
            let mut sessions = self.sessions.write().unwrap();
            match sessions.get_mut(&session_id) {
                Some(entry) => {
                    entry.info.last_activity_at = Utc::now();
                    Some((entry.info.clone(), entry.agent.clone()))
                }
                None => None,
            }
        };
        match updated_info {
            Some((info, agent)) => {
                self.persist(&info).await?;
                Ok(Some(agent))
            }
            None => Ok(None),
        }
    }

    /// `updateStatus` (spec §4.9).
    pub async fn update_status(&self, session_id: SessionId, status: RuntimeStatus) -> Result<()> {
        let info = {
            let mut sessions = self.sessions.write().unwrap();
            let entry = sessions.get_mut(&session_id).ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
            entry.info.status = status;
            entry.info.last_activity_at = Utc::now();
            entry.info.clone()
        };
        self.persist(&info).await?;
        self.bus.publish(events::session::updated(&session_id.to_string(), &format!("{status:?}").to_lowercase())).await;
        Ok(())
    }

    /// `destroy` (spec §4.9): unpersist, remove from the per-user index,
    /// drop from memory.
    pub async fn destroy(&self, session_id: SessionId) -> Result<()> {
        let user_id = {
            let mut sessions = self.sessions.write().unwrap();
            sessions.remove(&session_id).map(|entry| entry.info.user_id)
        };
        self.cache.delete(&session_cache_key(session_id)).await?;
        if let Some(user_id) = user_id {
            {
                let mut index = self.user_index.write().unwrap();
                if let Some(ids) = index.get_mut(&user_id) {
                    ids.retain(|id| *id != session_id);
                }
            }
            self.persist_user_index(&user_id).await?;
        }
        self.bus.publish(events::session::deleted(&session_id.to_string())).await;
        Ok(())
    }

    /// `restoreSessions()` (spec §4.9): scan cache for `session:*`, drop
    /// stale entries, recreate the rest with status `idle`. Best-effort:
    /// malformed entries are skipped with a log line. Idempotent — running
    /// it twice leaves the same set of in-memory sessions (spec §8 property 9).
    pub async fn restore_sessions(&self) -> Result<usize> {
        let keys = self.cache.keys("wukong:server:session:*").await?;
        let mut restored = 0;
        let now = Utc::now();

        for key in keys {
            let raw = match self.cache.get(&key).await {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to read session during restore, skipping");
                    continue;
                }
            };
            let mut info: SessionInfo = match serde_json::from_value(raw) {
                Ok(info) => info,
                Err(e) => {
                    warn!(key = %key, error = %e, "malformed session entry during restore, skipping");
                    continue;
                }
            };

            let idle_secs = (now - info.last_activity_at).num_seconds().max(0) as u64;
            if idle_secs > self.restore_timeout_secs {
                info!(session = %info.id, "dropping stale session during restore");
                let _ = self.cache.delete(&key).await;
                continue;
            }

            if self.sessions.read().unwrap().contains_key(&info.id) {
                continue;
            }

            info.status = RuntimeStatus::Idle;
            let agent = Arc::new((self.factory)(&info));
            self.sessions.write().unwrap().insert(info.id, SessionEntry { info: info.clone(), agent });
            self.user_index.write().unwrap().entry(info.user_id.clone()).or_default().push(info.id);
            self.bus.publish(events::session::resumed(&info.id.to_string())).await;
            restored += 1;
        }
        Ok(restored)
    }

    /// Spawns the background staleness sweep (spec §4.9 "Background cleanup
    /// sweeps stale sessions at a configurable interval").
    pub fn spawn_cleanup_task(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(self.cleanup_interval_secs));
            loop {
                interval.tick().await;
                if let Err(e) = self.sweep_stale().await {
                    warn!(error = %e, "session cleanup sweep failed");
                }
            }
        })
    }

    async fn sweep_stale(&self) -> Result<()> {
        let now = Utc::now();
        let stale: Vec<SessionId> = {
            let sessions = self.sessions.read().unwrap();
            sessions
                .values()
                .filter(|entry| (now - entry.info.last_activity_at).num_seconds().max(0) as u64 > self.restore_timeout_secs)
                .map(|entry| entry.info.id)
                .collect()
        };
        for id in stale {
            info!(session = %id, "evicting stale session");
            self.destroy(id).await?;
        }
        Ok(())
    }

    async fn persist(&self, info: &SessionInfo) -> Result<()> {
        self.cache.set(&session_cache_key(info.id), serde_json::to_value(info)?, None).await
    }

    async fn persist_user_index(&self, user_id: &str) -> Result<()> {
        let ids: Vec<SessionId> = self.user_index.read().unwrap().get(user_id).cloned().unwrap_or_default();
        self.cache.set(&user_index_cache_key(user_id), serde_json::to_value(ids)?, None).await
    }
}
