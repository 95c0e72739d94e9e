//! Conversation store — bounded in-memory cache over the durable log.
//!
//! Every session has its own async mutex. Holding a [`SessionGuard`] is the
//! only way to mutate a session's cache, so a full request cycle (user append,
//! model call, assistant append, truncate) can be made atomic per session
//! while unrelated sessions proceed in parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::session::log::{decode_row, DurableLog, Fidelity};
use crate::types::MessageEnvelope;

/// Default number of envelopes read back from the log on first contact.
pub const DEFAULT_HYDRATE_LIMIT: usize = 20;

/// Snapshot of one session's resident state.
#[derive(Clone, Debug)]
pub struct Session {
    pub session_id: String,
    pub cache: Vec<MessageEnvelope>,
    pub loaded: bool,
}

#[derive(Default)]
struct SessionState {
    cache: Vec<MessageEnvelope>,
    loaded: bool,
}

// ─────────────────────────────────────────────
// ConversationStore
// ─────────────────────────────────────────────

pub struct ConversationStore {
    log: DurableLog,
    sessions: Mutex<HashMap<String, Arc<AsyncMutex<SessionState>>>>,
    hydrate_limit: usize,
    degraded_rows: AtomicU64,
}

impl ConversationStore {
    pub fn new(log: DurableLog) -> Self {
        Self::with_hydrate_limit(log, DEFAULT_HYDRATE_LIMIT)
    }

    pub fn with_hydrate_limit(log: DurableLog, hydrate_limit: usize) -> Self {
        ConversationStore {
            log,
            sessions: Mutex::new(HashMap::new()),
            hydrate_limit,
            degraded_rows: AtomicU64::new(0),
        }
    }

    /// The durable log behind this store.
    pub fn log(&self) -> &DurableLog {
        &self.log
    }

    /// Rows restored as plain text because they could not be decoded.
    pub fn degraded_rows(&self) -> u64 {
        self.degraded_rows.load(Ordering::Relaxed)
    }

    fn slot(&self, session_id: &str) -> Arc<AsyncMutex<SessionState>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Take the session's lock, hydrating it from the log on first contact.
    ///
    /// The guard serializes all mutation of the session until dropped.
    pub async fn lock(&self, session_id: &str) -> StoreResult<SessionGuard> {
        let mut state = self.slot(session_id).lock_owned().await;
        if !state.loaded {
            self.hydrate(session_id, &mut state).await?;
        }
        Ok(SessionGuard {
            session_id: session_id.to_string(),
            log: self.log.clone(),
            state,
        })
    }

    async fn hydrate(&self, session_id: &str, state: &mut SessionState) -> StoreResult<()> {
        let rows = self.log.recent(session_id, self.hydrate_limit).await?;
        let mut cache = Vec::with_capacity(rows.len());

        for row in rows {
            let id = row.id;
            let decoded = decode_row(row);
            if let Fidelity::Degraded { reason } = &decoded.fidelity {
                self.degraded_rows.fetch_add(1, Ordering::Relaxed);
                warn!(session = %session_id, row = id, %reason, "restored degraded row");
            }
            cache.push(decoded.envelope);
        }

        debug!(session = %session_id, messages = cache.len(), "session hydrated");
        state.cache = cache;
        state.loaded = true;
        Ok(())
    }

    /// Resident state of a session, hydrating it if needed. Idempotent.
    pub async fn get_or_hydrate(&self, session_id: &str) -> StoreResult<Session> {
        Ok(self.lock(session_id).await?.snapshot())
    }

    /// Append one envelope: durable write first, then the cache.
    pub async fn append(&self, session_id: &str, envelope: MessageEnvelope) -> StoreResult<()> {
        self.lock(session_id).await?.append(envelope).await
    }

    /// Keep only the last `limit` cached envelopes. The log is untouched.
    pub async fn truncate(&self, session_id: &str, limit: usize) -> StoreResult<()> {
        self.lock(session_id).await?.truncate(limit);
        Ok(())
    }

    /// Delete every stored row of the session and empty its cache.
    ///
    /// Returns the number of rows removed.
    pub async fn clear(&self, session_id: &str) -> StoreResult<u64> {
        let mut state = self.slot(session_id).lock_owned().await;
        let removed = self.log.clear(session_id).await?;
        state.cache.clear();
        state.loaded = true;
        debug!(session = %session_id, removed, "session cleared");
        Ok(removed)
    }
}

// ─────────────────────────────────────────────
// SessionGuard
// ─────────────────────────────────────────────

/// Exclusive access to one hydrated session.
pub struct SessionGuard {
    session_id: String,
    log: DurableLog,
    state: OwnedMutexGuard<SessionState>,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Cached envelopes, oldest first.
    pub fn history(&self) -> &[MessageEnvelope] {
        &self.state.cache
    }

    /// Persist the envelope, then append it to the cache.
    ///
    /// On error the cache is unchanged.
    pub async fn append(&mut self, envelope: MessageEnvelope) -> StoreResult<()> {
        debug_assert_eq!(envelope.session_id, self.session_id);
        self.log.append(&envelope).await?;
        self.state.cache.push(envelope);
        Ok(())
    }

    pub fn truncate(&mut self, limit: usize) {
        let len = self.state.cache.len();
        if len > limit {
            self.state.cache.drain(..len - limit);
        }
    }

    pub fn snapshot(&self) -> Session {
        Session {
            session_id: self.session_id.clone(),
            cache: self.state.cache.clone(),
            loaded: self.state.loaded,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
