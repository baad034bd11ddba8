use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use qvault_db::Database;
use qvault_db::models::{MessageRow, ProfileRow};
use qvault_types::models::{Message, Profile, Role};

/// The persisted `messages` relation.
pub trait MessageStore: Send + Sync {
    /// All messages between `a` and `b` in either direction, ordered by
    /// `(created_at, seq)`.
    fn conversation(&self, a: Uuid, b: Uuid) -> impl Future<Output = Result<Vec<Message>>> + Send;

    /// Store a new unread message stamped with the current time and return it.
    fn insert(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        content: &str,
    ) -> impl Future<Output = Result<Message>> + Send;

    /// Flip `is_read` on everything `sender_id` sent to `recipient_id`.
    fn mark_read(
        &self,
        recipient_id: Uuid,
        sender_id: Uuid,
    ) -> impl Future<Output = Result<usize>> + Send;

    fn unread_count(
        &self,
        recipient_id: Uuid,
        sender_id: Uuid,
    ) -> impl Future<Output = Result<u32>> + Send;

    /// Every sender who has written to `recipient_id`, with their unread count.
    fn inbound_summary(
        &self,
        recipient_id: Uuid,
    ) -> impl Future<Output = Result<HashMap<Uuid, u32>>> + Send;
}

/// The persisted `profiles` relation.
pub trait ProfileStore: Send + Sync {
    fn profiles_by_role(&self, role: Role) -> impl Future<Output = Result<Vec<Profile>>> + Send;

    fn profiles_by_ids(&self, ids: Vec<Uuid>) -> impl Future<Output = Result<Vec<Profile>>> + Send;

    fn profile(&self, id: Uuid) -> impl Future<Output = Result<Option<Profile>>> + Send;

    fn upsert_profile(&self, profile: Profile) -> impl Future<Output = Result<()>> + Send;
}

/// Both relations backed by the SQLite database. Every call runs on the
/// blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
    }
}

impl MessageStore for SqliteStore {
    async fn conversation(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>> {
        let rows = self
            .blocking(move |db| db.get_conversation(&a.to_string(), &b.to_string()))
            .await?;
        rows.into_iter().map(message_from_row).collect()
    }

    async fn insert(&self, sender_id: Uuid, recipient_id: Uuid, content: &str) -> Result<Message> {
        let id = Uuid::new_v4();
        let content = content.to_string();

        let row = self
            .blocking(move |db| {
                db.insert_message(
                    &id.to_string(),
                    &content,
                    &sender_id.to_string(),
                    &recipient_id.to_string(),
                )
            })
            .await?;
        message_from_row(row)
    }

    async fn mark_read(&self, recipient_id: Uuid, sender_id: Uuid) -> Result<usize> {
        self.blocking(move |db| db.mark_read(&recipient_id.to_string(), &sender_id.to_string()))
            .await
    }

    async fn unread_count(&self, recipient_id: Uuid, sender_id: Uuid) -> Result<u32> {
        let count = self
            .blocking(move |db| db.unread_count(&recipient_id.to_string(), &sender_id.to_string()))
            .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn inbound_summary(&self, recipient_id: Uuid) -> Result<HashMap<Uuid, u32>> {
        let rows = self
            .blocking(move |db| db.get_inbound_summary(&recipient_id.to_string()))
            .await?;

        rows.into_iter()
            .map(|row| {
                let sender: Uuid = row
                    .sender_id
                    .parse::<Uuid>()
                    .with_context(|| format!("corrupt sender_id '{}'", row.sender_id))?;
                Ok((sender, u32::try_from(row.unread).unwrap_or(u32::MAX)))
            })
            .collect()
    }
}

impl ProfileStore for SqliteStore {
    async fn profiles_by_role(&self, role: Role) -> Result<Vec<Profile>> {
        let rows = self
            .blocking(move |db| db.get_profiles_by_role(role.as_str()))
            .await?;
        rows.into_iter().map(profile_from_row).collect()
    }

    async fn profiles_by_ids(&self, ids: Vec<Uuid>) -> Result<Vec<Profile>> {
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        let rows = self.blocking(move |db| db.get_profiles_by_ids(&ids)).await?;
        rows.into_iter().map(profile_from_row).collect()
    }

    async fn profile(&self, id: Uuid) -> Result<Option<Profile>> {
        let row = self.blocking(move |db| db.get_profile(&id.to_string())).await?;
        row.map(profile_from_row).transpose()
    }

    async fn upsert_profile(&self, profile: Profile) -> Result<()> {
        self.blocking(move |db| {
            db.upsert_profile(
                &profile.id.to_string(),
                profile.full_name.as_deref(),
                profile.school.as_deref(),
                profile.role.as_str(),
            )
        })
        .await
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .with_context(|| format!("corrupt created_at '{}'", raw))
}

fn message_from_row(row: MessageRow) -> Result<Message> {
    Ok(Message {
        id: row.id.parse::<Uuid>().with_context(|| format!("corrupt message id '{}'", row.id))?,
        seq: row.seq,
        sender_id: row
            .sender_id
            .parse::<Uuid>()
            .with_context(|| format!("corrupt sender_id on message '{}'", row.id))?,
        recipient_id: row
            .recipient_id
            .parse::<Uuid>()
            .with_context(|| format!("corrupt recipient_id on message '{}'", row.id))?,
        created_at: parse_timestamp(&row.created_at)?,
        content: row.content,
        is_read: row.is_read,
    })
}

fn profile_from_row(row: ProfileRow) -> Result<Profile> {
    Ok(Profile {
        id: row.id.parse::<Uuid>().with_context(|| format!("corrupt profile id '{}'", row.id))?,
        role: row.role.parse::<Role>().map_err(|e: String| anyhow!(e))?,
        full_name: row.full_name,
        school: row.school,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn inserted_message_reads_back_identically() {
        let store = store();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let sent = store.insert(a, b, "Can you help with Q3?").await.unwrap();
        assert!(!sent.is_read);

        let loaded = store.conversation(b, a).await.unwrap();
        assert_eq!(loaded, vec![sent]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_load_in_commit_order() {
        let store = store();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let sends: Vec<_> = (0..200)
            .map(|i| {
                let store = store.clone();
                let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
                tokio::spawn(async move { store.insert(from, to, &format!("message {}", i)).await })
            })
            .collect();
        for send in sends {
            send.await.unwrap().unwrap();
        }

        let loaded = store.conversation(a, b).await.unwrap();
        assert_eq!(loaded.len(), 200);
        assert!(loaded.windows(2).all(|w| w[0].seq < w[1].seq));
        assert!(loaded.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn inbound_summary_is_keyed_by_sender() {
        let store = store();
        let (teacher, s1, s2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store.insert(s1, teacher, "one").await.unwrap();
        store.insert(s1, teacher, "two").await.unwrap();
        store.insert(s2, teacher, "three").await.unwrap();
        store.mark_read(teacher, s2).await.unwrap();

        let summary = store.inbound_summary(teacher).await.unwrap();
        assert_eq!(summary.get(&s1), Some(&2));
        assert_eq!(summary.get(&s2), Some(&0));
        assert_eq!(store.unread_count(teacher, s1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn profiles_round_trip_through_upsert() {
        let store = store();
        let profile = Profile {
            id: Uuid::new_v4(),
            full_name: Some("Ms Naidoo".into()),
            school: Some("Westville High".into()),
            role: Role::Teacher,
        };
        store.upsert_profile(profile.clone()).await.unwrap();

        assert_eq!(store.profile(profile.id).await.unwrap(), Some(profile.clone()));
        assert_eq!(store.profiles_by_role(Role::Teacher).await.unwrap(), vec![profile.clone()]);
        assert!(store.profiles_by_role(Role::Student).await.unwrap().is_empty());
        assert_eq!(
            store.profiles_by_ids(vec![profile.id, Uuid::new_v4()]).await.unwrap(),
            vec![profile]
        );
    }
}
