//! Typing indicator heartbeat.
//!
//! While a command runs the bot keeps the platform's "typing..." indicator
//! alive by re-sending it on a fixed interval. The heartbeat stops on the
//! first of: an explicit stop from the command (first preview frame, DM
//! hand-off), or the owner finishing it after dispatch.

use crate::messaging::MessagingGateway;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Cloneable stop switch for a [`TypingHeartbeat`].
#[derive(Debug, Clone)]
pub struct TypingStop {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for TypingStop {
    fn default() -> Self {
        Self::new()
    }
}

impl TypingStop {
    /// A switch not yet connected to any heartbeat.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Stop the heartbeat. Returns `true` only for the call that stopped it.
    pub fn stop(&self) -> bool {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    /// Whether the heartbeat was stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Periodic typing indicator for one channel.
#[derive(Debug)]
pub struct TypingHeartbeat {
    stop: TypingStop,
    task: JoinHandle<u64>,
}

impl TypingHeartbeat {
    /// Start sending typing indicators to `channel_id` every `interval`.
    ///
    /// The first indicator is sent immediately.
    #[must_use]
    pub fn start(
        gateway: Arc<dyn MessagingGateway>,
        channel_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let stop = TypingStop::new();
        let mut rx = stop.subscribe();
        let channel_id = channel_id.into();

        let task = tokio::spawn(async move {
            let mut beats = 0_u64;
            loop {
                if *rx.borrow_and_update() {
                    break;
                }
                if let Err(e) = gateway.trigger_typing(&channel_id).await {
                    warn!(channel = %channel_id, error = %e, "failed to send typing indicator");
                }
                beats += 1;

                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(channel = %channel_id, beats, "typing heartbeat stopped");
            beats
        });

        Self { stop, task }
    }

    /// Switch that stops this heartbeat.
    #[must_use]
    pub fn stop_signal(&self) -> TypingStop {
        self.stop.clone()
    }

    /// Stop the heartbeat and wait for it. Returns the number of indicators sent.
    pub async fn finish(self) -> u64 {
        self.stop.stop();
        self.task.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MemoryGateway;

    #[tokio::test(start_paused = true)]
    async fn test_beats_until_finished() {
        let gw = Arc::new(MemoryGateway::new());
        let hb = TypingHeartbeat::start(Arc::<MemoryGateway>::clone(&gw), "c1", Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(hb.finish().await, 3);
        assert_eq!(gw.typing_count(), 3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(gw.typing_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_fires_once() {
        let gw = Arc::new(MemoryGateway::new());
        let hb = TypingHeartbeat::start(Arc::<MemoryGateway>::clone(&gw), "c1", Duration::from_secs(5));
        let stop = hb.stop_signal();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(stop.stop());
        assert!(!stop.stop());
        assert!(stop.is_stopped());

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(hb.finish().await, 1);
        assert_eq!(gw.typing_count(), 1);
    }

    #[test]
    fn test_detached_stop() {
        let stop = TypingStop::new();
        assert!(!stop.is_stopped());
        assert!(stop.stop());
        assert!(stop.is_stopped());
    }
}
