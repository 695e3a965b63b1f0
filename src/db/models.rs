/// Database row types and the closed enums stored in them.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Party role. Parsed once at the boundary (case-insensitive) and carried typed from there on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Role {
    Patient,
    Psychologist,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Psychologist => "psychologist",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" => Ok(Self::Patient),
            "psychologist" => Ok(Self::Psychologist),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery state of a message. The derived ordering is the transition order:
/// `Sent < Delivered < Read`. Server and client both decide "forward progress" with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    /// True when moving from `self` to `next` is forward progress.
    pub fn advances_to(self, next: MessageStatus) -> bool {
        next > self
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            other => Err(format!("unknown message status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
    Deleted,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }
}

impl FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown conversation status '{}'", other)),
        }
    }
}

/// Stores the closed enums as their lowercase TEXT names.
macro_rules! text_enum_sql {
    ($($ty:ty),*) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    value
                        .as_str()?
                        .parse()
                        .map_err(|e: String| FromSqlError::Other(e.into()))
                }
            }
        )*
    };
}

text_enum_sql!(Role, MessageStatus, ConversationStatus);

/// Who a message is addressed to. The administration desk is a logical recipient,
/// not a specific operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    SpecificUser { id: String, role: Role },
    AdministrationDesk,
}

impl Recipient {
    /// Build a recipient from the nullable wire fields. A null id or an admin type
    /// means the administration desk. A blank id is rejected, never routed.
    pub fn from_parts(id: Option<String>, role: Option<Role>) -> Result<Self, String> {
        match (id, role) {
            (_, Some(Role::Admin)) => Ok(Self::AdministrationDesk),
            (None, _) => Ok(Self::AdministrationDesk),
            (Some(id), Some(role)) if !id.trim().is_empty() => Ok(Self::SpecificUser { id, role }),
            (Some(_), Some(_)) => Err("recipientId must not be blank".to_string()),
            (Some(_), None) => Err("recipientType is required with recipientId".to_string()),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::SpecificUser { id, .. } => Some(id),
            Self::AdministrationDesk => None,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::SpecificUser { role, .. } => *role,
            Self::AdministrationDesk => Role::Admin,
        }
    }
}

/// Conversation row. A `None` participant slot is the administration desk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub psychologist_id: Option<String>,
    pub patient_id: Option<String>,
    pub status: ConversationStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl Conversation {
    /// Conversation with the administration desk on one side.
    pub fn is_administration(&self) -> bool {
        self.psychologist_id.is_none() || self.patient_id.is_none()
    }

    /// Whether `user_id` acting as `role` may read and write in this conversation.
    pub fn has_participant(&self, user_id: &str, role: Role) -> bool {
        match role {
            Role::Admin => self.is_administration(),
            Role::Psychologist => self.psychologist_id.as_deref() == Some(user_id),
            Role::Patient => self.patient_id.as_deref() == Some(user_id),
        }
    }

    /// The party on the other side from a participant acting as `role`.
    pub fn counterpart_of(&self, role: Role) -> Option<Recipient> {
        match role {
            Role::Admin => match (&self.psychologist_id, &self.patient_id) {
                (Some(id), None) => Some(Recipient::SpecificUser {
                    id: id.clone(),
                    role: Role::Psychologist,
                }),
                (None, Some(id)) => Some(Recipient::SpecificUser {
                    id: id.clone(),
                    role: Role::Patient,
                }),
                _ => None,
            },
            Role::Psychologist => Some(match &self.patient_id {
                Some(id) => Recipient::SpecificUser {
                    id: id.clone(),
                    role: Role::Patient,
                },
                None => Recipient::AdministrationDesk,
            }),
            Role::Patient => Some(match &self.psychologist_id {
                Some(id) => Recipient::SpecificUser {
                    id: id.clone(),
                    role: Role::Psychologist,
                },
                None => Recipient::AdministrationDesk,
            }),
        }
    }
}

/// Message row. `is_read` mirrors `status == Read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_type: Role,
    pub recipient_id: Option<String>,
    pub recipient_type: Role,
    pub content: String,
    pub status: MessageStatus,
    pub is_read: bool,
    pub created_at: String,
}

/// Member directory row, written by the profile system and read for recipient
/// validation and broadcast group resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub role: Role,
    pub display_name: String,
    #[serde(default)]
    pub plan: Option<String>,
}
