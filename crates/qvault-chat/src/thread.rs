use std::collections::HashSet;

use uuid::Uuid;

use qvault_types::models::{ConversationKey, Message};

use crate::error::ValidationError;

/// Checks applied to an outgoing message before anything touches storage.
pub fn validate_outgoing(
    sender_id: Uuid,
    recipient_id: Uuid,
    content: &str,
) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    if sender_id == recipient_id {
        return Err(ValidationError::SelfMessage);
    }
    Ok(())
}

/// In-memory copy of one conversation as a viewer sees it.
///
/// Loads, optimistic sends and live deliveries all go through [`merge`] or
/// [`replace`], so a message id appears at most once and the sequence stays
/// sorted by `(created_at, seq)` whatever order things arrive in.
///
/// [`merge`]: ThreadView::merge
/// [`replace`]: ThreadView::replace
#[derive(Debug, Clone)]
pub struct ThreadView {
    viewer_id: Uuid,
    counterpart_id: Uuid,
    messages: Vec<Message>,
    ids: HashSet<Uuid>,
}

impl ThreadView {
    pub fn new(viewer_id: Uuid, counterpart_id: Uuid) -> Self {
        Self {
            viewer_id,
            counterpart_id,
            messages: Vec::new(),
            ids: HashSet::new(),
        }
    }

    pub fn counterpart_id(&self) -> Uuid {
        self.counterpart_id
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.viewer_id, self.counterpart_id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    pub fn belongs(&self, message: &Message) -> bool {
        message.conversation() == self.key()
    }

    /// Merge messages into the view. Messages from other conversations are
    /// ignored; a known id only ever has its read flag raised. Returns how
    /// many messages were new.
    pub fn merge<I>(&mut self, incoming: I) -> usize
    where
        I: IntoIterator<Item = Message>,
    {
        let mut added = 0;
        for message in incoming {
            if !self.belongs(&message) {
                continue;
            }
            if self.ids.insert(message.id) {
                self.messages.push(message);
                added += 1;
            } else if message.is_read {
                if let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) {
                    existing.is_read = true;
                }
            }
        }

        if added > 0 {
            // Stable, so equal keys keep arrival order.
            self.messages.sort_by_key(Message::order_key);
        }
        added
    }

    /// Install an authoritative load. Anything already held that sorts after
    /// the newest loaded message (it arrived after the load's snapshot) is
    /// kept; everything else is taken from the load.
    pub fn replace(&mut self, loaded: Vec<Message>) {
        let newest = loaded.iter().map(Message::order_key).max();
        let loaded_ids: HashSet<Uuid> = loaded.iter().map(|m| m.id).collect();

        let carried: Vec<Message> = std::mem::take(&mut self.messages)
            .into_iter()
            .filter(|m| !loaded_ids.contains(&m.id))
            .filter(|m| newest.is_none_or(|n| m.order_key() > n))
            .collect();

        self.ids.clear();
        self.merge(loaded);
        self.merge(carried);
    }

    /// Reflect a completed mark-read: every inbound message is now read.
    pub fn mark_inbound_read(&mut self) {
        for message in &mut self.messages {
            if message.recipient_id == self.viewer_id {
                message.is_read = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn message(seq: i64, from: Uuid, to: Uuid, secs: i64) -> Message {
        Message {
            id: Uuid::new_v4(),
            seq,
            content: format!("message {}", seq),
            sender_id: from,
            recipient_id: to,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(secs),
            is_read: false,
        }
    }

    #[test]
    fn validation_rejects_blank_and_self_messages() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(validate_outgoing(a, b, " \n\t"), Err(ValidationError::EmptyContent));
        assert_eq!(validate_outgoing(a, a, "hi"), Err(ValidationError::SelfMessage));
        assert_eq!(validate_outgoing(a, b, "  hi "), Ok(()));
    }

    #[test]
    fn merge_sorts_out_of_order_arrivals() {
        let (me, them) = (Uuid::new_v4(), Uuid::new_v4());
        let mut view = ThreadView::new(me, them);

        let late = message(3, them, me, 30);
        let early = message(1, me, them, 10);
        let middle = message(2, them, me, 20);
        assert_eq!(view.merge([late.clone()]), 1);
        assert_eq!(view.merge([early.clone(), middle.clone()]), 2);

        let ids: Vec<Uuid> = view.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![early.id, middle.id, late.id]);
    }

    #[test]
    fn same_id_is_kept_once() {
        let (me, them) = (Uuid::new_v4(), Uuid::new_v4());
        let mut view = ThreadView::new(me, them);

        let sent = message(1, me, them, 0);
        assert_eq!(view.merge([sent.clone()]), 1);
        assert_eq!(view.merge([sent.clone()]), 0);
        assert_eq!(view.len(), 1);
        assert!(view.contains(sent.id));
    }

    #[test]
    fn merge_ignores_other_conversations() {
        let (me, them, stranger) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut view = ThreadView::new(me, them);

        assert_eq!(view.merge([message(1, stranger, me, 0)]), 0);
        assert!(view.is_empty());
    }

    #[test]
    fn read_flag_only_rises() {
        let (me, them) = (Uuid::new_v4(), Uuid::new_v4());
        let mut view = ThreadView::new(me, them);

        let mut inbound = message(1, them, me, 0);
        inbound.is_read = true;
        view.merge([inbound.clone()]);

        inbound.is_read = false;
        view.merge([inbound]);
        assert!(view.messages()[0].is_read);
    }

    #[test]
    fn replace_keeps_only_newer_speculative_messages() {
        let (me, them) = (Uuid::new_v4(), Uuid::new_v4());
        let mut view = ThreadView::new(me, them);

        let stale = message(1, them, me, 5);
        let fresh = message(9, them, me, 50);
        view.merge([stale.clone(), fresh.clone()]);

        let loaded = vec![message(2, me, them, 10), message(3, them, me, 20)];
        view.replace(loaded.clone());

        let ids: Vec<Uuid> = view.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![loaded[0].id, loaded[1].id, fresh.id]);
        assert!(!view.contains(stale.id));
    }

    #[test]
    fn mark_inbound_read_leaves_outgoing_alone() {
        let (me, them) = (Uuid::new_v4(), Uuid::new_v4());
        let mut view = ThreadView::new(me, them);
        view.merge([message(1, them, me, 0), message(2, me, them, 1)]);

        view.mark_inbound_read();
        assert!(view.messages()[0].is_read);
        assert!(!view.messages()[1].is_read);
    }
}
