use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, trace, warn};
use uuid::Uuid;

use qvault_types::models::Message;

use crate::error::ChatError;

/// Change notifications for the messages relation, filtered by recipient.
pub trait ChangeFeed: Send + Sync {
    /// Receive every message inserted for `recipient_id` from now on, until
    /// the returned handle is dropped.
    fn subscribe(&self, recipient_id: Uuid) -> Result<Subscription, ChatError>;

    /// Announce a newly committed message.
    fn publish(&self, message: &Message);
}

/// A live registration on a [`ChangeFeed`]. Dropping it unregisters.
pub struct Subscription {
    rx: mpsc::Receiver<Message>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<R>(rx: mpsc::Receiver<Message>, release: R) -> Self
    where
        R: FnOnce() + Send + 'static,
    {
        Self {
            rx,
            release: Some(Box::new(release)),
        }
    }

    /// Next delivered message; `None` once the feed has dropped this
    /// subscription.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Backoff used when a subscription is lost.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 8,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given zero-based attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug)]
pub enum DeliveryEvent {
    /// A message addressed to the viewer was inserted
    Message(Message),

    /// The subscription was re-established after a drop. Anything sent in
    /// between was missed, so open state should be reloaded.
    Resumed,

    /// Reconnection gave up. Reported once; the channel then stays idle.
    Lost(ChatError),
}

enum State {
    Attached(Subscription),
    Reconnecting { attempt: u32 },
    Lost,
}

/// A viewer's live inbound feed with reconnect-on-drop.
pub struct DeliveryChannel<F> {
    feed: F,
    recipient_id: Uuid,
    policy: ReconnectPolicy,
    state: State,
}

impl<F: ChangeFeed> DeliveryChannel<F> {
    pub fn connect(feed: F, recipient_id: Uuid, policy: ReconnectPolicy) -> Result<Self, ChatError> {
        let subscription = feed.subscribe(recipient_id)?;
        info!("Delivery channel attached for {}", recipient_id);
        Ok(Self {
            feed,
            recipient_id,
            policy,
            state: State::Attached(subscription),
        })
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.state, State::Attached(_))
    }

    /// Wait for the next event. Cancel-safe: a reconnect interrupted by a
    /// dropped future resumes at the same attempt on the next call.
    pub async fn next(&mut self) -> DeliveryEvent {
        loop {
            match &mut self.state {
                State::Attached(subscription) => match subscription.recv().await {
                    Some(message) => {
                        trace!("Delivered message {} to {}", message.id, self.recipient_id);
                        return DeliveryEvent::Message(message);
                    }
                    None => {
                        warn!("Delivery subscription for {} dropped, reconnecting", self.recipient_id);
                        self.state = State::Reconnecting { attempt: 0 };
                    }
                },
                State::Reconnecting { attempt } => {
                    let current = *attempt;
                    if current >= self.policy.max_attempts {
                        self.state = State::Lost;
                        return DeliveryEvent::Lost(ChatError::Subscription(format!(
                            "gave up after {} reconnect attempts",
                            current
                        )));
                    }

                    tokio::time::sleep(self.policy.delay(current)).await;

                    match self.feed.subscribe(self.recipient_id) {
                        Ok(subscription) => {
                            info!(
                                "Delivery subscription for {} restored after {} attempt(s)",
                                self.recipient_id,
                                current + 1
                            );
                            self.state = State::Attached(subscription);
                            return DeliveryEvent::Resumed;
                        }
                        Err(e) => {
                            warn!("Reconnect attempt {} for {} failed: {}", current + 1, self.recipient_id, e);
                            self.state = State::Reconnecting { attempt: current + 1 };
                        }
                    }
                }
                State::Lost => std::future::pending::<()>().await,
            }
        }
    }

    /// Release the underlying subscription now.
    pub fn close(&mut self) {
        self.state = State::Lost;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use chrono::Utc;

    /// Minimal in-process feed for exercising the channel.
    #[derive(Clone, Default)]
    pub(crate) struct TestFeed {
        inner: Arc<TestFeedInner>,
    }

    #[derive(Default)]
    struct TestFeedInner {
        subscribers: Mutex<HashMap<Uuid, mpsc::Sender<Message>>>,
        refuse: AtomicU32,
        subscribes: AtomicU32,
    }

    impl TestFeed {
        /// Refuse the next `n` subscribe calls.
        pub(crate) fn refuse_next(&self, n: u32) {
            self.inner.refuse.store(n, Ordering::SeqCst);
        }

        /// Drop a subscriber's sender, as a feed does when it evicts one.
        pub(crate) fn evict(&self, recipient_id: Uuid) {
            self.inner.subscribers.lock().unwrap().remove(&recipient_id);
        }

        pub(crate) fn is_subscribed(&self, recipient_id: Uuid) -> bool {
            self.inner.subscribers.lock().unwrap().contains_key(&recipient_id)
        }

        pub(crate) fn subscribe_calls(&self) -> u32 {
            self.inner.subscribes.load(Ordering::SeqCst)
        }
    }

    impl ChangeFeed for TestFeed {
        fn subscribe(&self, recipient_id: Uuid) -> Result<Subscription, ChatError> {
            self.inner.subscribes.fetch_add(1, Ordering::SeqCst);
            let refused = self
                .inner
                .refuse
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(ChatError::Subscription("feed unavailable".into()));
            }

            let (tx, rx) = mpsc::channel(16);
            self.inner.subscribers.lock().unwrap().insert(recipient_id, tx);
            let inner = self.inner.clone();
            Ok(Subscription::new(rx, move || {
                inner.subscribers.lock().unwrap().remove(&recipient_id);
            }))
        }

        fn publish(&self, message: &Message) {
            if let Some(tx) = self.inner.subscribers.lock().unwrap().get(&message.recipient_id) {
                let _ = tx.try_send(message.clone());
            }
        }
    }

    fn quick_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_attempts,
        }
    }

    fn message_to(recipient_id: Uuid) -> Message {
        Message {
            id: Uuid::new_v4(),
            seq: 1,
            content: "ping".into(),
            sender_id: Uuid::new_v4(),
            recipient_id,
            created_at: Utc::now(),
            is_read: false,
        }
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(10), Duration::from_secs(30));
        assert_eq!(policy.delay(40), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn delivers_only_messages_for_the_recipient() {
        let feed = TestFeed::default();
        let me = Uuid::new_v4();
        let mut channel = DeliveryChannel::connect(feed.clone(), me, quick_policy(3)).unwrap();

        feed.publish(&message_to(Uuid::new_v4()));
        let mine = message_to(me);
        feed.publish(&mine);

        match channel.next().await {
            DeliveryEvent::Message(m) => assert_eq!(m.id, mine.id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn close_and_drop_release_the_subscription() {
        let feed = TestFeed::default();
        let me = Uuid::new_v4();

        let mut channel = DeliveryChannel::connect(feed.clone(), me, quick_policy(3)).unwrap();
        assert!(feed.is_subscribed(me));
        channel.close();
        assert!(!feed.is_subscribed(me));
        assert!(!channel.is_attached());

        let channel = DeliveryChannel::connect(feed.clone(), me, quick_policy(3)).unwrap();
        drop(channel);
        assert!(!feed.is_subscribed(me));
    }

    #[tokio::test]
    async fn reconnects_after_eviction() {
        let feed = TestFeed::default();
        let me = Uuid::new_v4();
        let mut channel = DeliveryChannel::connect(feed.clone(), me, quick_policy(5)).unwrap();

        feed.evict(me);
        feed.refuse_next(2);
        assert!(matches!(channel.next().await, DeliveryEvent::Resumed));
        assert_eq!(feed.subscribe_calls(), 4);

        let after = message_to(me);
        feed.publish(&after);
        assert!(matches!(channel.next().await, DeliveryEvent::Message(m) if m.id == after.id));
    }

    #[tokio::test]
    async fn reports_loss_once_attempts_run_out() {
        let feed = TestFeed::default();
        let me = Uuid::new_v4();
        let mut channel = DeliveryChannel::connect(feed.clone(), me, quick_policy(2)).unwrap();

        feed.evict(me);
        feed.refuse_next(10);
        match channel.next().await {
            DeliveryEvent::Lost(ChatError::Subscription(_)) => {}
            other => panic!("unexpected event: {:?}", other),
        }

        let idle = tokio::time::timeout(Duration::from_millis(20), channel.next()).await;
        assert!(idle.is_err());
    }
}
