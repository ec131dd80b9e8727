//! In-process network listener
//!
//! [`QueueListener`] is the control-thread side; any number of
//! [`InboundSender`] clones may feed it from other threads. Items are kept in
//! FIFO order and drained exactly once.

use hoyo_kernel::network::{InboundItem, NetworkError, NetworkListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Producer handle for a [`QueueListener`].
#[derive(Clone)]
pub struct InboundSender {
    tx: flume::Sender<InboundItem>,
    accepting: Arc<AtomicBool>,
}

impl InboundSender {
    /// Enqueue an item. Fails while the listener is stopped.
    pub fn send(&self, item: InboundItem) -> Result<(), NetworkError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(NetworkError::NotAccepting);
        }
        self.tx.send(item).map_err(|_| NetworkError::QueueClosed)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }
}

pub struct QueueListener {
    tx: flume::Sender<InboundItem>,
    rx: flume::Receiver<InboundItem>,
    accepting: Arc<AtomicBool>,
}

impl QueueListener {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            accepting: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn sender(&self) -> InboundSender {
        InboundSender {
            tx: self.tx.clone(),
            accepting: self.accepting.clone(),
        }
    }

    /// Number of items waiting to be drained.
    pub fn queued(&self) -> usize {
        self.rx.len()
    }
}

impl Default for QueueListener {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkListener for QueueListener {
    fn start(&mut self) -> Result<(), NetworkError> {
        if self.accepting.swap(true, Ordering::AcqRel) {
            return Err(NetworkError::AlreadyStarted);
        }
        info!("Inbound queue listener started");
        Ok(())
    }

    fn stop(&mut self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            info!("Inbound queue listener stopped ({} item(s) left undrained)", self.rx.len());
        }
    }

    fn is_running(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    fn try_next(&mut self) -> Option<InboundItem> {
        let item = self.rx.try_recv().ok()?;
        debug!("Drained inbound item {} from {}", item.id, item.connection);
        Some(item)
    }
}
