use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use qvault_chat::{ChangeFeed, ChatError, Subscription};
use qvault_types::models::Message;

/// Per-recipient fan-out of newly stored messages to live sessions.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// recipient_id -> (subscription id -> sender)
    subscribers: Mutex<HashMap<Uuid, HashMap<Uuid, mpsc::Sender<Message>>>>,

    /// Queue depth per subscription. A subscriber that falls this far behind
    /// is dropped and has to resubscribe.
    capacity: usize,
}

impl DispatcherInner {
    fn remove(&self, recipient_id: Uuid, subscription_id: Uuid) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        if let Some(sessions) = subscribers.get_mut(&recipient_id) {
            sessions.remove(&subscription_id);
            if sessions.is_empty() {
                subscribers.remove(&recipient_id);
            }
        }
    }
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                subscribers: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Number of live subscriptions for a recipient.
    pub fn subscriber_count(&self, recipient_id: Uuid) -> usize {
        self.inner
            .subscribers
            .lock()
            .map(|s| s.get(&recipient_id).map_or(0, HashMap::len))
            .unwrap_or(0)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ChangeFeed for Dispatcher {
    fn subscribe(&self, recipient_id: Uuid) -> Result<Subscription, ChatError> {
        let subscription_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.capacity);

        self.inner
            .subscribers
            .lock()
            .map_err(|e| ChatError::Subscription(format!("dispatcher lock poisoned: {}", e)))?
            .entry(recipient_id)
            .or_default()
            .insert(subscription_id, tx);

        debug!("Subscription {} registered for {}", subscription_id, recipient_id);

        // Weak so an outstanding handle does not keep the dispatcher alive.
        let inner: Weak<DispatcherInner> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(rx, move || {
            if let Some(inner) = inner.upgrade() {
                inner.remove(recipient_id, subscription_id);
            }
        }))
    }

    fn publish(&self, message: &Message) {
        let Ok(mut subscribers) = self.inner.subscribers.lock() else {
            warn!("Dispatcher lock poisoned, dropping delivery of {}", message.id);
            return;
        };
        let Some(sessions) = subscribers.get_mut(&message.recipient_id) else {
            return;
        };

        sessions.retain(|subscription_id, tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "Subscription {} for {} lagged past {} messages, dropping it",
                    subscription_id, message.recipient_id, self.inner.capacity
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if sessions.is_empty() {
            subscribers.remove(&message.recipient_id);
        }
    }
}
