use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use qvault_types::models::{DirectoryEntry, Profile, Role, Viewer};

use crate::error::ChatError;
use crate::store::{MessageStore, ProfileStore};

/// Counterparts a viewer can message, sorted by display name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    entries: Vec<DirectoryEntry>,
}

impl Directory {
    pub fn from_entries(mut entries: Vec<DirectoryEntry>) -> Self {
        entries.sort_by(compare_entries);
        Self { entries }
    }

    /// Build the directory for `viewer`.
    ///
    /// Students see every teacher. Teachers only see students who have written
    /// to them; a sender without a profile row still gets an entry under the
    /// fallback name. No viewer yields an empty directory.
    pub async fn build<S>(store: &S, viewer: Option<&Viewer>) -> Result<Self, ChatError>
    where
        S: MessageStore + ProfileStore,
    {
        let Some(viewer) = viewer else {
            return Ok(Self::default());
        };

        let unread = store.inbound_summary(viewer.id).await?;

        let entries = match viewer.role {
            Role::Student => store
                .profiles_by_role(Role::Teacher)
                .await?
                .iter()
                .filter(|p| p.id != viewer.id)
                .map(|p| DirectoryEntry::new(p, unread.get(&p.id).copied().unwrap_or(0)))
                .collect(),
            Role::Teacher => {
                let senders: Vec<Uuid> = unread.keys().copied().collect();
                let mut profiles: HashMap<Uuid, Profile> = store
                    .profiles_by_ids(senders.clone())
                    .await?
                    .into_iter()
                    .map(|p| (p.id, p))
                    .collect();

                senders
                    .into_iter()
                    .map(|id| {
                        let profile = profiles.remove(&id).unwrap_or_else(|| Profile {
                            id,
                            full_name: None,
                            school: None,
                            role: Role::Student,
                        });
                        DirectoryEntry::new(&profile, unread[&id])
                    })
                    .collect()
            }
        };

        let directory = Self::from_entries(entries);
        debug!(
            "Directory for {} ({}): {} entries",
            viewer.display_name,
            viewer.role,
            directory.len()
        );
        Ok(directory)
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<DirectoryEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, counterpart_id: Uuid) -> Option<&DirectoryEntry> {
        self.entries.iter().find(|e| e.id == counterpart_id)
    }

    pub fn unread_count(&self, counterpart_id: Uuid) -> Option<u32> {
        self.get(counterpart_id).map(|e| e.unread_count)
    }

    /// Overwrite the unread count for a listed counterpart. Returns `None`
    /// if the counterpart is not listed.
    pub fn set_unread(&mut self, counterpart_id: Uuid, unread_count: u32) -> Option<u32> {
        let entry = self.entries.iter_mut().find(|e| e.id == counterpart_id)?;
        entry.unread_count = unread_count;
        Some(unread_count)
    }

    /// Returns true if the count was non-zero.
    pub fn clear_unread(&mut self, counterpart_id: Uuid) -> bool {
        match self.entries.iter_mut().find(|e| e.id == counterpart_id) {
            Some(entry) if entry.unread_count > 0 => {
                entry.unread_count = 0;
                true
            }
            _ => false,
        }
    }

    /// Add or replace an entry, keeping sort order.
    pub fn upsert(&mut self, entry: DirectoryEntry) {
        self.entries.retain(|e| e.id != entry.id);
        let at = self
            .entries
            .partition_point(|e| compare_entries(e, &entry) == Ordering::Less);
        self.entries.insert(at, entry);
    }

    /// Entries whose name or affiliation contains `query`, ignoring case.
    pub fn search(&self, query: &str) -> Vec<&DirectoryEntry> {
        let needle = query.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|e| {
                needle.is_empty()
                    || e.display_name.to_lowercase().contains(&needle)
                    || e.affiliation.to_lowercase().contains(&needle)
            })
            .collect()
    }
}

fn compare_entries(a: &DirectoryEntry, b: &DirectoryEntry) -> Ordering {
    a.display_name
        .to_lowercase()
        .cmp(&b.display_name.to_lowercase())
        .then_with(|| a.id.cmp(&b.id))
}
