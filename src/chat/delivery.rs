//! Delivery of rendered messages to participants.
//!
//! The relay hands each rendered message to a [`DeliverySink`] and moves
//! on. [`SessionSink`] is the in-process sink: one unbounded channel per
//! connected participant, drained by that participant's session task.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use super::render::{Identity, RenderedMessage};
use crate::participant::{Participant, ParticipantId};

/// Delivery to one recipient failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The recipient has no open session.
    #[error("participant {0} is not connected")]
    NotConnected(ParticipantId),

    /// The recipient's session went away.
    #[error("session for participant {0} is closed")]
    Closed(ParticipantId),
}

/// A message as handed to a recipient's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    /// Identity shown as the source of the message.
    pub identity: Identity,
    /// Rendered content.
    pub message: RenderedMessage,
    /// When the relay handed the message over.
    pub timestamp: DateTime<Utc>,
}

/// Destination for rendered messages.
pub trait DeliverySink: Send + Sync {
    /// Deliver one message. Must not block on the recipient.
    fn deliver(
        &self,
        recipient: &Participant,
        identity: Identity,
        message: &RenderedMessage,
    ) -> Result<(), DeliveryError>;
}

/// In-process sink backed by one unbounded channel per participant.
#[derive(Debug, Default)]
pub struct SessionSink {
    sessions: RwLock<HashMap<ParticipantId, mpsc::UnboundedSender<Delivery>>>,
}

impl SessionSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for `id`, replacing any previous one.
    pub fn connect(&self, id: ParticipantId) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        rx
    }

    /// Close the session for `id`. Returns false if there was none.
    pub fn disconnect(&self, id: ParticipantId) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
    }

    pub fn is_connected(&self, id: ParticipantId) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&id)
    }
}

impl DeliverySink for SessionSink {
    fn deliver(
        &self,
        recipient: &Participant,
        identity: Identity,
        message: &RenderedMessage,
    ) -> Result<(), DeliveryError> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let tx = sessions
            .get(&recipient.id())
            .ok_or(DeliveryError::NotConnected(recipient.id()))?;

        tx.send(Delivery {
            identity,
            message: message.clone(),
            timestamp: Utc::now(),
        })
        .map_err(|_| DeliveryError::Closed(recipient.id()))
    }
}
