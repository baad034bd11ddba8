use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DirectoryEntry, Message, Role};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready {
        user_id: Uuid,
        display_name: String,
        role: Role,
    },

    /// Full directory snapshot (on connect and on refresh)
    Directory { entries: Vec<DirectoryEntry> },

    /// The open thread's authoritative contents after a load
    ThreadLoaded {
        counterpart_id: Uuid,
        messages: Vec<Message>,
    },

    ThreadLoadFailed { counterpart_id: Uuid, reason: String },

    /// A message was merged into the open thread
    MessageAppended { message: Message },

    /// Unread count for a counterpart changed
    UnreadChanged {
        counterpart_id: Uuid,
        unread_count: u32,
    },

    /// A counterpart not previously in the directory wrote in
    ContactAdded { entry: DirectoryEntry },

    /// Send refused before reaching storage
    SendRejected { recipient_id: Uuid, reason: String },

    /// Storage refused the message; `content` is returned for retry
    SendFailed {
        recipient_id: Uuid,
        content: String,
        reason: String,
    },

    /// Whether live delivery is currently attached
    LiveUpdates { active: bool },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Make a counterpart's thread the active one (loads and marks read)
    OpenThread { counterpart_id: Uuid },

    CloseThread,

    SendMessage { recipient_id: Uuid, content: String },

    RefreshDirectory,
}
