use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;

use super::protocol::JsonRpcRequest;
use super::transport::{Outbound, SseFrame, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No transport found for sessionId")]
    NotFound(String),
}

/// One client's SSE connection as seen by the server
#[derive(Debug)]
pub struct McpSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    outbound: Outbound,
    inbound: mpsc::Sender<JsonRpcRequest>,
}

impl McpSession {
    /// Queue a client message for this session's protocol engine
    pub async fn deliver(&self, request: JsonRpcRequest) -> Result<(), TransportError> {
        self.inbound
            .send(request)
            .await
            .map_err(|_| TransportError::StreamClosed)
    }

    /// Write a frame straight onto this session's event stream
    pub async fn send(&self, frame: SseFrame) -> Result<(), TransportError> {
        self.outbound.send(frame).await
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }
}

/// Open sessions keyed by id.
///
/// Shared by every connection handler; all access goes through `open`, `close` and
/// `lookup`, each of which holds the lock for the whole operation.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<McpSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id and register a session around the given channels
    pub fn open(
        &self,
        outbound: Outbound,
        inbound: mpsc::Sender<JsonRpcRequest>,
    ) -> Arc<McpSession> {
        let mut sessions = self.write();

        let id = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Arc::new(McpSession {
            id: id.clone(),
            created_at: Utc::now(),
            outbound,
            inbound,
        });
        sessions.insert(id, session.clone());

        session
    }

    /// Remove a session and close its transport. Returns false if it was already gone.
    pub fn close(&self, id: &str) -> bool {
        let removed = self.write().remove(id);

        match removed {
            Some(session) => {
                session.outbound.close();
                tracing::info!(
                    session_id = %id,
                    open_sessions = self.len(),
                    "SSE session closed"
                );
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<McpSession>, SessionError> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // Writers never leave the map half-updated, so a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<McpSession>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<McpSession>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}
