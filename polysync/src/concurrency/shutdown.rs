//! Shutdown signaling for background workers.
//!
//! A single [`ShutdownTx`] is owned by the context; every worker holds a [`ShutdownRx`]
//! subscribed to it and stops at its next suspension point once the signal is sent.

use tokio::sync::watch;

/// Receiver side of the shutdown channel.
pub type ShutdownRx = watch::Receiver<()>;

/// Sender side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Signals shutdown to every subscribed worker.
    ///
    /// Sending with no live receiver is not an error: it only means no worker is running.
    pub fn shutdown(&self) {
        self.0.send_replace(());
    }

    /// Returns a new receiver. The signal already sent, if any, is considered seen.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}
