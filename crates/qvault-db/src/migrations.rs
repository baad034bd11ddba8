use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
            id          TEXT PRIMARY KEY,
            full_name   TEXT,
            school      TEXT,
            role        TEXT NOT NULL CHECK (role IN ('student', 'teacher')),
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_profiles_role
            ON profiles(role, full_name);

        -- seq breaks created_at ties in insertion order
        CREATE TABLE IF NOT EXISTS chat_messages (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            id              TEXT NOT NULL UNIQUE,
            content         TEXT NOT NULL CHECK (length(trim(content)) > 0),
            sender_id       TEXT NOT NULL,
            recipient_id    TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            is_read         INTEGER NOT NULL DEFAULT 0,
            CHECK (sender_id <> recipient_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_pair
            ON chat_messages(sender_id, recipient_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_chat_messages_inbox
            ON chat_messages(recipient_id, is_read);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
