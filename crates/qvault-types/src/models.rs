use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Portal role carried by every identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
        }
    }

    /// The role on the other side of a conversation.
    pub fn counterpart(&self) -> Role {
        match self {
            Self::Student => Self::Teacher,
            Self::Teacher => Self::Student,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Self::Student),
            "teacher" => Ok(Self::Teacher),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// A user as the profiles relation stores it. Owned by the identity side;
/// messaging only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub school: Option<String>,
    pub role: Role,
}

impl Profile {
    pub fn display_name(&self) -> &str {
        match self.full_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => match self.role {
                Role::Student => "Student",
                Role::Teacher => "Teacher",
            },
        }
    }

    pub fn affiliation(&self) -> &str {
        match self.school.as_deref() {
            Some(school) if !school.trim().is_empty() => school,
            _ => match self.role {
                Role::Student => "Student",
                Role::Teacher => "Q'Vault Facilitator",
            },
        }
    }
}

/// The signed-in user a session acts on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub id: Uuid,
    pub role: Role,
    pub display_name: String,
    pub school: Option<String>,
}

impl Viewer {
    pub fn profile(&self) -> Profile {
        Profile {
            id: self.id,
            full_name: Some(self.display_name.clone()).filter(|n| !n.trim().is_empty()),
            school: self.school.clone(),
            role: self.role,
        }
    }
}

/// A direct message. Immutable apart from `is_read`, which only ever goes
/// from false to true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    /// Store-assigned insertion number, used to break `created_at` ties.
    pub seq: i64,
    pub content: String,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

impl Message {
    pub fn conversation(&self) -> ConversationKey {
        ConversationKey::new(self.sender_id, self.recipient_id)
    }

    /// The other participant, from `viewer`'s point of view.
    pub fn counterpart_of(&self, viewer: Uuid) -> Uuid {
        if self.sender_id == viewer {
            self.recipient_id
        } else {
            self.sender_id
        }
    }

    /// Sort key for thread order.
    pub fn order_key(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.seq)
    }
}

/// Unordered participant pair identifying a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    low: Uuid,
    high: Uuid,
}

impl ConversationKey {
    pub fn new(a: Uuid, b: Uuid) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }
}

/// One row of a viewer's conversation directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: Uuid,
    pub display_name: String,
    pub affiliation: String,
    pub role: Role,
    pub unread_count: u32,
}

impl DirectoryEntry {
    pub fn new(profile: &Profile, unread_count: u32) -> Self {
        Self {
            id: profile.id,
            display_name: profile.display_name().to_string(),
            affiliation: profile.affiliation().to_string(),
            role: profile.role,
            unread_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_key_ignores_direction() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(ConversationKey::new(a, b), ConversationKey::new(b, a));
        assert_ne!(ConversationKey::new(a, b), ConversationKey::new(a, Uuid::new_v4()));
    }

    #[test]
    fn profile_fallbacks_follow_role() {
        let teacher = Profile {
            id: Uuid::new_v4(),
            full_name: None,
            school: Some("  ".into()),
            role: Role::Teacher,
        };
        assert_eq!(teacher.display_name(), "Teacher");
        assert_eq!(teacher.affiliation(), "Q'Vault Facilitator");

        let student = Profile {
            id: Uuid::new_v4(),
            full_name: Some("Amara Okafor".into()),
            school: None,
            role: Role::Student,
        };
        assert_eq!(student.display_name(), "Amara Okafor");
        assert_eq!(student.affiliation(), "Student");
    }

    #[test]
    fn role_parses_its_own_name() {
        for role in [Role::Student, Role::Teacher] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("admin".parse::<Role>().is_err());
    }
}
