//! Session cache keyed by `server:transport`
//!
//! TigerStyle: Explicit health tag per session, one lock per key held
//! across connect.

use super::message::McpResult;
use super::transport::McpTransport;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Healthy,
    Invalid,
}

struct Session {
    transport: Arc<dyn McpTransport>,
    state: SessionState,
}

/// One key's session; empty until the first successful connect
type SessionSlot = Arc<Mutex<Option<Session>>>;

/// Live sessions owned by one protocol instance
#[derive(Default)]
pub struct SessionCache {
    slots: Mutex<HashMap<String, SessionSlot>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, key: &str) -> SessionSlot {
        self.slots
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    async fn existing_slots(&self) -> Vec<SessionSlot> {
        self.slots.lock().await.values().cloned().collect()
    }

    /// Return the healthy session for `key`, connecting if there is none
    ///
    /// Concurrent callers for the same key wait for an in-flight connect;
    /// other keys are not blocked.
    pub async fn get_or_connect<F, Fut>(&self, key: &str, connect: F) -> McpResult<Arc<dyn McpTransport>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = McpResult<Arc<dyn McpTransport>>>,
    {
        let slot = self.slot(key).await;
        let mut session = slot.lock().await;

        if let Some(current) = session.as_ref() {
            if current.state == SessionState::Healthy {
                return Ok(current.transport.clone());
            }
        }
        if let Some(stale) = session.take() {
            debug!(session = %key, "Rebuilding invalidated MCP session");
            stale.transport.close().await;
        }

        let transport = connect().await?;
        *session = Some(Session {
            transport: transport.clone(),
            state: SessionState::Healthy,
        });
        info!(session = %key, "MCP session cached");
        Ok(transport)
    }

    /// Mark the session unusable if it is still the one that failed
    pub async fn invalidate(&self, key: &str, failed: &Arc<dyn McpTransport>) {
        let slot = self.slots.lock().await.get(key).cloned();
        let Some(slot) = slot else {
            return;
        };
        if let Some(session) = slot.lock().await.as_mut() {
            if Arc::ptr_eq(&session.transport, failed) {
                session.state = SessionState::Invalid;
                debug!(session = %key, "MCP session invalidated");
            }
        };
    }

    /// Close and forget one session
    pub async fn close(&self, key: &str) -> bool {
        let slot = self.slots.lock().await.remove(key);
        let Some(slot) = slot else {
            return false;
        };
        let session = slot.lock().await.take();
        match session {
            Some(session) => {
                session.transport.close().await;
                true
            }
            None => false,
        }
    }

    /// Close and forget every session
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(String, SessionSlot)> = self.slots.lock().await.drain().collect();
        let mut count = 0;
        for (key, slot) in drained {
            let session = slot.lock().await.take();
            if let Some(session) = session {
                debug!(session = %key, "Closing MCP session");
                session.transport.close().await;
                count += 1;
            }
        }
        count
    }

    /// Number of cached sessions, healthy or not
    ///
    /// Waits for in-flight connects.
    pub async fn len(&self) -> usize {
        let mut count = 0;
        for slot in self.existing_slots().await {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
