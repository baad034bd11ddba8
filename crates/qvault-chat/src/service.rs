use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use qvault_types::models::{Message, Profile, Viewer};

use crate::delivery::{ChangeFeed, DeliveryChannel, ReconnectPolicy};
use crate::directory::Directory;
use crate::error::ChatError;
use crate::store::{MessageStore, ProfileStore};
use crate::thread::validate_outgoing;

/// Persisted messaging operations for any viewer.
pub struct ChatService<S, F> {
    inner: Arc<Inner<S, F>>,
}

struct Inner<S, F> {
    store: S,
    feed: F,
    reconnect: ReconnectPolicy,
}

impl<S, F> Clone for ChatService<S, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, F> ChatService<S, F>
where
    S: MessageStore + ProfileStore,
    F: ChangeFeed + Clone,
{
    pub fn new(store: S, feed: F, reconnect: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                feed,
                reconnect,
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub async fn directory(&self, viewer: Option<&Viewer>) -> Result<Directory, ChatError> {
        Directory::build(&self.inner.store, viewer).await
    }

    /// Messages between the viewer and `counterpart_id`, oldest first.
    pub async fn load(&self, viewer: &Viewer, counterpart_id: Uuid) -> Result<Vec<Message>, ChatError> {
        Ok(self.inner.store.conversation(viewer.id, counterpart_id).await?)
    }

    /// Mark everything `counterpart_id` sent the viewer as read. Safe to
    /// repeat; returns how many messages changed.
    pub async fn mark_read(&self, viewer: &Viewer, counterpart_id: Uuid) -> Result<usize, ChatError> {
        let changed = self.inner.store.mark_read(viewer.id, counterpart_id).await?;
        if changed > 0 {
            debug!("{} read {} message(s) from {}", viewer.id, changed, counterpart_id);
        }
        Ok(changed)
    }

    /// Open a thread: mark it read, then load it so the returned flags are
    /// already current.
    pub async fn open_thread(&self, viewer: &Viewer, counterpart_id: Uuid) -> Result<Vec<Message>, ChatError> {
        self.mark_read(viewer, counterpart_id).await?;
        self.load(viewer, counterpart_id).await
    }

    pub async fn unread_count(&self, viewer: &Viewer, counterpart_id: Uuid) -> Result<u32, ChatError> {
        Ok(self.inner.store.unread_count(viewer.id, counterpart_id).await?)
    }

    /// Persist a message and announce it to the recipient's live feed.
    pub async fn send(&self, sender: &Viewer, recipient_id: Uuid, content: &str) -> Result<Message, ChatError> {
        validate_outgoing(sender.id, recipient_id, content)?;

        let message = self
            .inner
            .store
            .insert(sender.id, recipient_id, content)
            .await
            .map_err(|e| {
                warn!("Send from {} to {} failed: {:#}", sender.id, recipient_id, e);
                ChatError::SendFailed {
                    content: content.to_string(),
                    reason: e.to_string(),
                }
            })?;

        info!("Message {} sent {} -> {}", message.id, sender.id, recipient_id);
        self.inner.feed.publish(&message);
        Ok(message)
    }

    pub fn subscribe(&self, viewer: &Viewer) -> Result<DeliveryChannel<F>, ChatError> {
        DeliveryChannel::connect(self.inner.feed.clone(), viewer.id, self.inner.reconnect)
    }

    /// Mirror the signed-in identity into the profiles relation. Writes only
    /// when the stored row differs; returns whether it wrote.
    pub async fn sync_profile(&self, viewer: &Viewer) -> Result<bool, ChatError> {
        let profile = viewer.profile();
        if self.inner.store.profile(viewer.id).await?.as_ref() == Some(&profile) {
            return Ok(false);
        }
        self.inner.store.upsert_profile(profile).await?;
        debug!("Profile for {} updated", viewer.id);
        Ok(true)
    }

    pub async fn profile(&self, id: Uuid) -> Result<Option<Profile>, ChatError> {
        Ok(self.inner.store.profile(id).await?)
    }
}
