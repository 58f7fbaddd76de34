//! One-shot startup latch.

use std::{future::Future, sync::Arc};

use tokio::sync::watch;

/// Resolves every waiter, past and future, once released.
#[derive(Clone)]
pub struct StartLatch {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StartLatch {
    fn default() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }
}

impl StartLatch {
    /// Unreleased latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Release all waiters. Returns false if already released.
    pub fn release(&self) -> bool {
        self.tx.send_if_modified(|released| {
            if *released {
                false
            } else {
                *released = true;
                true
            }
        })
    }

    /// True once released.
    pub fn is_released(&self) -> bool {
        *self.tx.borrow()
    }

    /// Future that completes once the latch is released.
    ///
    /// Never fails. Resolves on the first poll if already released.
    pub fn wait(&self) -> impl Future<Output = ()> + Send + use<> {
        let tx = Arc::clone(&self.tx);
        async move {
            let mut rx = tx.subscribe();
            // The sender lives in this future, so `wait_for` cannot see it closed.
            let _ = rx.wait_for(|released| *released).await;
        }
    }
}
