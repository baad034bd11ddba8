/// Database row types. These map directly to SQLite rows.
/// Distinct from qvault-types models to keep the DB layer independent.

pub struct ProfileRow {
    pub id: String,
    pub full_name: Option<String>,
    pub school: Option<String>,
    pub role: String,
}

pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub content: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub created_at: String,
    pub is_read: bool,
}

/// Per-sender totals for one recipient's inbox.
pub struct InboundSummaryRow {
    pub sender_id: String,
    pub unread: i64,
}
