//! Fan-out of committed transitions to observers.
//!
//! The bridge is a pure fan-out point: it keeps no history and never retries.
//! Delivery is at-most-once and best-effort:
//!
//! - with no observer registered, a published event is dropped
//! - an observer that falls more than `capacity` events behind loses the
//!   oldest ones, and the loss is logged
//!
//! Whatever ultimately tells the other party (push, email, a badge) consumes
//! these events; that channel is outside this crate.

use futures::Stream;
use reservation_core::TransitionEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::metrics::notifications;

/// Default number of events buffered per observer.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

/// Broadcasts [`TransitionEvent`]s to every registered observer.
#[derive(Clone, Debug)]
pub struct NotificationBridge {
    sender: broadcast::Sender<TransitionEvent>,
}

impl NotificationBridge {
    /// Create a bridge buffering `capacity` events per observer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current observers.
    ///
    /// Returns the number of observers that will see it; zero means it was
    /// dropped.
    pub fn publish(&self, event: TransitionEvent) -> usize {
        match self.sender.send(event) {
            Ok(observers) => {
                notifications::record_delivered();
                observers
            }
            Err(broadcast::error::SendError(event)) => {
                tracing::trace!(
                    request_id = %event.request_id,
                    to = %event.to,
                    "No observers registered, dropping transition event"
                );
                notifications::record_dropped();
                0
            }
        }
    }

    /// Register an observer. Only events published after this call are seen.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.sender.subscribe()
    }

    /// Register an observer as a stream of events.
    ///
    /// Lagged events are skipped; the stream ends when the bridge is dropped.
    pub fn events(&self) -> impl Stream<Item = TransitionEvent> + Send + 'static {
        let mut receiver = self.sender.subscribe();
        async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Notification observer lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationBridge {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_CAPACITY)
    }
}
