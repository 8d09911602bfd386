//! Run-wide interrupt flag.
//!
//! Once [`Interrupt::listen`] has registered the Ctrl-C handler, SIGINT no longer
//! terminates the process, so every long-running step (downloads, pours, builds)
//! has to watch this flag and unwind through its own rollback instead.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Interrupt {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Interrupt {
    /// A flag nothing sets except [`Interrupt::trigger`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Set the flag on every Ctrl-C for the rest of the process.
    /// Must be called from within a tokio runtime.
    pub fn listen(&self) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupt received");
                tx.send_replace(true);
            }
        });
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the flag is set.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}
