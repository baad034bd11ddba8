use std::collections::HashMap;

use tracing::{debug, trace};
use uuid::Uuid;

use qvault_types::models::{DirectoryEntry, Message, Profile, Viewer};

use crate::directory::Directory;
use crate::thread::ThreadView;

/// Identifies which thread an async request was issued for. A completion
/// whose token is no longer current belongs to an abandoned thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadToken {
    counterpart_id: Uuid,
    generation: u64,
}

impl ThreadToken {
    pub fn counterpart_id(&self) -> Uuid {
        self.counterpart_id
    }
}

/// A pending re-read of one counterpart's unread count. Only the most
/// recently issued token for a counterpart is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreadToken {
    counterpart_id: Uuid,
    epoch: u64,
}

impl UnreadToken {
    pub fn counterpart_id(&self) -> Uuid {
        self.counterpart_id
    }
}

/// A pending directory rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryToken {
    epoch: u64,
}

/// What a live delivery did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Merged into the open thread
    Appended,
    /// Already in the open thread
    Duplicate,
    /// From a listed counterpart; the unread count must be re-read
    Unread(UnreadToken),
    /// From a counterpart the directory does not list yet; needs a profile
    /// lookup and an unread count
    NewContact(UnreadToken),
    /// Not addressed to this viewer
    Ignored,
}

/// One viewer's messaging state: directory, the active thread, and the
/// tokens guarding async work against it. Only ever mutated from one task.
///
/// Unread counts always come from the store. A delivery only asks for a
/// re-read, and a result is applied only if no newer request for the same
/// counterpart was issued in the meantime, so counts never double up or go
/// stale when a delivery races a directory snapshot.
pub struct ChatSession {
    viewer: Viewer,
    directory: Directory,
    active: Option<ThreadView>,
    generation: u64,
    epoch: u64,
    /// counterpart -> epoch of the latest unread re-read issued for it
    recounts: HashMap<Uuid, u64>,
    /// epoch of the newest directory snapshot installed
    directory_epoch: u64,
}

impl ChatSession {
    pub fn new(viewer: Viewer, directory: Directory) -> Self {
        Self {
            viewer,
            directory,
            active: None,
            generation: 0,
            epoch: 0,
            recounts: HashMap::new(),
            directory_epoch: 0,
        }
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn active_thread(&self) -> Option<&ThreadView> {
        self.active.as_ref()
    }

    /// Token for the thread currently open, if any.
    pub fn current_token(&self) -> Option<ThreadToken> {
        self.active.as_ref().map(|view| ThreadToken {
            counterpart_id: view.counterpart_id(),
            generation: self.generation,
        })
    }

    pub fn is_current(&self, token: &ThreadToken) -> bool {
        self.current_token().as_ref() == Some(token)
    }

    fn is_active(&self, counterpart_id: Uuid) -> bool {
        self.active
            .as_ref()
            .is_some_and(|view| view.counterpart_id() == counterpart_id)
    }

    /// Switch the active thread. Every token handed out before this call
    /// stops being current.
    pub fn open(&mut self, counterpart_id: Uuid) -> ThreadToken {
        self.generation += 1;
        self.active = Some(ThreadView::new(self.viewer.id, counterpart_id));
        debug!("{} opened thread with {}", self.viewer.id, counterpart_id);
        ThreadToken {
            counterpart_id,
            generation: self.generation,
        }
    }

    pub fn close(&mut self) {
        self.generation += 1;
        self.active = None;
    }

    /// Apply a completed open (mark read + load). Returns false and changes
    /// nothing when the token is stale.
    pub fn apply_loaded(&mut self, token: ThreadToken, messages: Vec<Message>) -> bool {
        if !self.is_current(&token) {
            debug!("Discarding load for abandoned thread with {}", token.counterpart_id);
            return false;
        }
        if let Some(view) = self.active.as_mut() {
            view.replace(messages);
        }
        self.directory.clear_unread(token.counterpart_id);
        true
    }

    /// Merge the stored copy of a message this viewer sent, if its thread is
    /// open now. The thread may have been left and reopened since the send
    /// was issued; the merge is keyed by id so a reload that already holds
    /// it is unaffected.
    pub fn apply_sent(&mut self, message: Message) -> bool {
        match self.active.as_mut() {
            Some(view) if view.belongs(&message) => view.merge([message]) > 0,
            _ => false,
        }
    }

    /// Apply a completed mark-read issued while the thread was open.
    pub fn apply_marked_read(&mut self, token: ThreadToken) -> bool {
        if !self.is_current(&token) {
            return false;
        }
        if let Some(view) = self.active.as_mut() {
            view.mark_inbound_read();
        }
        self.directory.clear_unread(token.counterpart_id);
        true
    }

    /// Route one live delivery.
    pub fn deliver(&mut self, message: Message) -> Inbound {
        if message.recipient_id != self.viewer.id {
            return Inbound::Ignored;
        }
        let counterpart_id = message.sender_id;

        if let Some(view) = self.active.as_mut() {
            if view.belongs(&message) {
                if view.contains(message.id) {
                    return Inbound::Duplicate;
                }
                trace!("Delivery {} into open thread", message.id);
                view.merge([message]);
                return Inbound::Appended;
            }
        }

        let token = self.request_unread(counterpart_id);
        if self.directory.get(counterpart_id).is_some() {
            Inbound::Unread(token)
        } else {
            Inbound::NewContact(token)
        }
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// Supersede every earlier re-read for `counterpart_id`.
    pub fn request_unread(&mut self, counterpart_id: Uuid) -> UnreadToken {
        let epoch = self.next_epoch();
        self.recounts.insert(counterpart_id, epoch);
        UnreadToken {
            counterpart_id,
            epoch,
        }
    }

    fn is_latest(&self, token: &UnreadToken) -> bool {
        self.recounts.get(&token.counterpart_id) == Some(&token.epoch)
    }

    /// Install a re-read unread count. Returns the count now shown, or `None`
    /// if the token was superseded or the counterpart is not listed.
    pub fn apply_unread(&mut self, token: UnreadToken, unread_count: u32) -> Option<u32> {
        if !self.is_latest(&token) {
            trace!("Discarding superseded unread count for {}", token.counterpart_id);
            return None;
        }
        let shown = if self.is_active(token.counterpart_id) { 0 } else { unread_count };
        self.directory.set_unread(token.counterpart_id, shown)
    }

    /// List a counterpart discovered through a delivery, with the unread count
    /// read alongside its profile. Returns `None` if superseded.
    pub fn add_contact(
        &mut self,
        token: UnreadToken,
        profile: &Profile,
        unread_count: u32,
    ) -> Option<DirectoryEntry> {
        if !self.is_latest(&token) {
            return None;
        }
        let shown = if self.is_active(profile.id) { 0 } else { unread_count };
        let entry = DirectoryEntry::new(profile, shown);
        self.directory.upsert(entry.clone());
        Some(entry)
    }

    pub fn request_directory(&mut self) -> DirectoryToken {
        DirectoryToken {
            epoch: self.next_epoch(),
        }
    }

    /// Install a rebuilt directory. Counterparts re-read after the snapshot
    /// was requested keep their newer entries; the open thread stays read.
    /// Returns false if a newer snapshot is already installed.
    pub fn apply_directory(&mut self, token: DirectoryToken, directory: Directory) -> bool {
        if token.epoch < self.directory_epoch {
            return false;
        }
        self.directory_epoch = token.epoch;

        let mut directory = directory;
        for (&counterpart_id, &epoch) in &self.recounts {
            if epoch > token.epoch {
                if let Some(entry) = self.directory.get(counterpart_id) {
                    directory.upsert(entry.clone());
                }
            }
        }
        // Re-reads issued before the snapshot are covered by it.
        self.recounts.retain(|_, epoch| *epoch > token.epoch);

        self.directory = directory;
        if let Some(view) = &self.active {
            self.directory.clear_unread(view.counterpart_id());
        }
        true
    }
}
