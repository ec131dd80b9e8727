//! Network listener contract.
//!
//! The wire-level listener runs outside the control thread. Its only link to
//! the host is an inbound FIFO queue that the runtime drains once per tick.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One inbound item handed from the listener to the control thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundItem {
    pub id: Uuid,
    /// Connection the item arrived on. Items from one connection keep their order.
    pub connection: String,
    pub payload: serde_json::Value,
}

impl InboundItem {
    pub fn new(connection: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            connection: connection.into(),
            payload,
        }
    }
}

/// Errors raised by a network listener.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum NetworkError {
    #[error("Network listener failed to start: {0}")]
    StartFailed(String),

    #[error("Network listener is already running")]
    AlreadyStarted,

    #[error("Network listener is not accepting inbound items")]
    NotAccepting,

    #[error("Inbound queue closed")]
    QueueClosed,
}

/// The external listener, seen from the control thread.
pub trait NetworkListener: Send {
    fn start(&mut self) -> Result<(), NetworkError>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Pop the oldest queued item without blocking.
    fn try_next(&mut self) -> Option<InboundItem>;
}
