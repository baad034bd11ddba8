use crate::models::{InboundSummaryRow, MessageRow, ProfileRow};
use crate::Database;
use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, Row};

const MESSAGE_COLUMNS: &str = "seq, id, content, sender_id, recipient_id, created_at, is_read";

impl Database {
    // -- Profiles --

    pub fn upsert_profile(
        &self,
        id: &str,
        full_name: Option<&str>,
        school: Option<&str>,
        role: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, full_name, school, role) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     full_name = excluded.full_name,
                     school = excluded.school,
                     role = excluded.role",
                rusqlite::params![id, full_name, school, role],
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, full_name, school, role FROM profiles WHERE id = ?1",
                [id],
                profile_from_row,
            )
            .optional()
        })
    }

    pub fn get_profiles_by_role(&self, role: &str) -> Result<Vec<ProfileRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, full_name, school, role FROM profiles WHERE role = ?1 ORDER BY full_name",
            )?;
            let rows = stmt
                .query_map([role], profile_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch profiles for a set of ids. Unknown ids are skipped.
    pub fn get_profiles_by_ids(&self, ids: &[String]) -> Result<Vec<ProfileRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, full_name, school, role FROM profiles WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), profile_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert a message and return the stored row.
    ///
    /// `created_at` is stamped while the connection lock is held and never
    /// goes below the previous row's, so timestamp order and `seq` order
    /// agree even under concurrent sends or a clock step backwards.
    pub fn insert_message(
        &self,
        id: &str,
        content: &str,
        sender_id: &str,
        recipient_id: &str,
    ) -> Result<MessageRow> {
        self.with_conn(|conn| {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
            let latest: Option<String> = conn
                .query_row(
                    "SELECT created_at FROM chat_messages ORDER BY seq DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            // Fixed-width UTC text, so string order is time order.
            let created_at = match latest {
                Some(latest) if latest > now => latest,
                _ => now,
            };

            conn.execute(
                "INSERT INTO chat_messages (id, content, sender_id, recipient_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, content, sender_id, recipient_id, created_at],
            )?;

            Ok(MessageRow {
                seq: conn.last_insert_rowid(),
                id: id.to_string(),
                content: content.to_string(),
                sender_id: sender_id.to_string(),
                recipient_id: recipient_id.to_string(),
                created_at,
                is_read: false,
            })
        })
    }

    /// Every message exchanged between `a` and `b`, oldest first.
    pub fn get_conversation(&self, a: &str, b: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_conversation(conn, a, b))
    }

    /// Flag every unread message from `sender_id` to `recipient_id` as read.
    /// Returns how many rows changed.
    pub fn mark_read(&self, recipient_id: &str, sender_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE chat_messages SET is_read = 1
                 WHERE recipient_id = ?1 AND sender_id = ?2 AND is_read = 0",
                [recipient_id, sender_id],
            )?;
            Ok(changed)
        })
    }

    pub fn unread_count(&self, recipient_id: &str, sender_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM chat_messages
                 WHERE recipient_id = ?1 AND sender_id = ?2 AND is_read = 0",
                [recipient_id, sender_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Distinct senders who have written to `recipient_id`, with unread totals.
    pub fn get_inbound_summary(&self, recipient_id: &str) -> Result<Vec<InboundSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sender_id, SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END)
                 FROM chat_messages
                 WHERE recipient_id = ?1
                 GROUP BY sender_id",
            )?;
            let rows = stmt
                .query_map([recipient_id], |row| {
                    Ok(InboundSummaryRow {
                        sender_id: row.get(0)?,
                        unread: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        id: row.get(0)?,
        full_name: row.get(1)?,
        school: row.get(2)?,
        role: row.get(3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        content: row.get(2)?,
        sender_id: row.get(3)?,
        recipient_id: row.get(4)?,
        created_at: row.get(5)?,
        is_read: row.get(6)?,
    })
}

fn query_conversation(conn: &Connection, a: &str, b: &str) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "SELECT {} FROM chat_messages
         WHERE (sender_id = ?1 AND recipient_id = ?2)
            OR (sender_id = ?2 AND recipient_id = ?1)
         ORDER BY created_at ASC, seq ASC",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map([a, b], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
