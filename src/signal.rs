//! Coordination primitives shared by the background workers.
//!
//! - [`PendingSlot`] holds at most one outstanding request; extra requests
//!   are dropped instead of queued.
//! - [`Shutdown`] is the cancellation signal every loop selects on.

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

/// Single-slot request buffer.
///
/// `try_request` never blocks. While a request is pending, further requests
/// are dropped and the caller is told so.
#[derive(Debug)]
pub struct PendingSlot<T> {
    value: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> PendingSlot<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Store `request` if the slot is empty. Returns false when dropped.
    pub fn try_request(&self, request: T) -> bool {
        {
            let mut slot = self.value.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(request);
        }
        self.notify.notify_one();
        true
    }

    /// Take the pending request without waiting.
    pub fn take(&self) -> Option<T> {
        self.value.lock().take()
    }

    /// Wait until a request is available and take it.
    pub async fn recv(&self) -> T {
        loop {
            if let Some(request) = self.take() {
                return request;
            }
            // A permit stored by notify_one before we started waiting wakes us immediately
            self.notify.notified().await;
        }
    }
}

impl<T> Default for PendingSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending half of the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Receiving half of the shutdown signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Create a connected trigger/listener pair.
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // send_replace succeeds even when every listener is gone
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    /// A listener that never fires, for one-shot calls outside any worker.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // The receiver keeps reporting `false` once the sender is gone
        drop(tx);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested.
    ///
    /// If the trigger is dropped without firing, this never resolves.
    pub async fn wait(&mut self) {
        if self.is_triggered() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }
}
