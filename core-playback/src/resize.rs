//! # Shared Resize Coordinator
//!
//! Several sessions on one surface react to layout changes. Each
//! [`ResizeCoordinator::notify`] restarts a debounce window; subscribers see
//! the generation counter advance only once the window elapses quietly, so
//! every session reads the settled layout exactly once per burst.

use core_runtime::config::SessionSettings;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, trace};

/// Debounced, restart-on-change resize notification. Clones share one timer.
#[derive(Debug, Clone)]
pub struct ResizeCoordinator {
    notify: mpsc::UnboundedSender<()>,
    generation: watch::Receiver<u64>,
}

impl ResizeCoordinator {
    /// Must be called inside a tokio runtime. The timer task ends when the
    /// last clone is dropped.
    pub fn new(debounce: Duration) -> Self {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (generation_tx, generation_rx) = watch::channel(0);
        tokio::spawn(debounce_loop(debounce, notify_rx, generation_tx));

        Self {
            notify: notify_tx,
            generation: generation_rx,
        }
    }

    /// Coordinator using `session.resize_debounce`.
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self::new(settings.resize_debounce)
    }

    /// A layout change happened.
    pub fn notify(&self) {
        // The loop only exits once every sender is gone.
        let _ = self.notify.send(());
    }

    /// Receiver that changes once per settled burst of notifications.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.clone()
    }

    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }
}

async fn debounce_loop(
    debounce: Duration,
    mut notify: mpsc::UnboundedReceiver<()>,
    generation: watch::Sender<u64>,
) {
    while notify.recv().await.is_some() {
        let mut restarts = 0u32;
        loop {
            tokio::select! {
                more = notify.recv() => match more {
                    Some(()) => restarts += 1,
                    None => return,
                },
                _ = time::sleep(debounce) => break,
            }
        }

        generation.send_modify(|g| *g += 1);
        trace!(restarts, "Resize burst settled");
    }
    debug!("Resize coordinator stopped");
}
