// src/web/slot.rs - The single active session
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::session::Session;
use crate::protocol::Envelope;

/// Holds at most one session. Installing a new one closes the old one.
/// Unsolicited pushes (job progress, late errors) go to whatever is here.
#[derive(Debug, Clone, Default)]
pub struct SessionSlot {
    active: Arc<RwLock<Option<Arc<Session>>>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `session` the active one, closing and returning the previous.
    pub async fn install(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let previous = self.active.write().await.replace(session.clone());
        if let Some(previous) = &previous {
            tracing::info!(session = %session.id(), "Superseding session {}", previous.id());
            previous.close();
        }
        previous
    }

    pub async fn active(&self) -> Option<Arc<Session>> {
        self.active.read().await.clone()
    }

    /// Clear the slot, but only if it still holds session `id`.
    pub async fn clear_if(&self, id: Uuid) -> bool {
        let mut active = self.active.write().await;
        if active.as_ref().is_some_and(|s| s.id() == id) {
            *active = None;
            true
        } else {
            false
        }
    }

    /// Close and drop the active session.
    pub async fn close_active(&self) {
        if let Some(session) = self.active.write().await.take() {
            session.close();
        }
    }

    /// Send to the active session. Returns false when nobody is connected.
    pub async fn publish(&self, envelope: &Envelope) -> bool {
        match self.active().await {
            Some(session) => session.send(envelope),
            None => {
                tracing::debug!("No active session for {:?} event", envelope.kind);
                false
            }
        }
    }
}
