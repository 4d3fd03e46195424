use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use portal_core::{AuditLogId, DomainError, UserId};

/// Action tag of an audit entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "user.created")]
    UserCreated,
    #[serde(rename = "user.updated")]
    UserUpdated,
    #[serde(rename = "user.deleted")]
    UserDeleted,
    #[serde(rename = "role.created")]
    RoleCreated,
    #[serde(rename = "role.updated")]
    RoleUpdated,
    #[serde(rename = "role.deleted")]
    RoleDeleted,
    #[serde(rename = "member.created")]
    MemberCreated,
    #[serde(rename = "member.updated")]
    MemberUpdated,
    #[serde(rename = "member.deleted")]
    MemberDeleted,
    #[serde(rename = "file.uploaded")]
    FileUploaded,
    #[serde(rename = "file.shared")]
    FileShared,
    #[serde(rename = "file.deleted")]
    FileDeleted,
}

impl AuditAction {
    pub const ALL: [AuditAction; 12] = [
        AuditAction::UserCreated,
        AuditAction::UserUpdated,
        AuditAction::UserDeleted,
        AuditAction::RoleCreated,
        AuditAction::RoleUpdated,
        AuditAction::RoleDeleted,
        AuditAction::MemberCreated,
        AuditAction::MemberUpdated,
        AuditAction::MemberDeleted,
        AuditAction::FileUploaded,
        AuditAction::FileShared,
        AuditAction::FileDeleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserCreated => "user.created",
            AuditAction::UserUpdated => "user.updated",
            AuditAction::UserDeleted => "user.deleted",
            AuditAction::RoleCreated => "role.created",
            AuditAction::RoleUpdated => "role.updated",
            AuditAction::RoleDeleted => "role.deleted",
            AuditAction::MemberCreated => "member.created",
            AuditAction::MemberUpdated => "member.updated",
            AuditAction::MemberDeleted => "member.deleted",
            AuditAction::FileUploaded => "file.uploaded",
            AuditAction::FileShared => "file.shared",
            AuditAction::FileDeleted => "file.deleted",
        }
    }

    /// Target type implied by the action.
    pub fn target(&self) -> AuditTarget {
        match self {
            AuditAction::UserCreated | AuditAction::UserUpdated | AuditAction::UserDeleted => {
                AuditTarget::User
            }
            AuditAction::RoleCreated | AuditAction::RoleUpdated | AuditAction::RoleDeleted => {
                AuditTarget::Role
            }
            AuditAction::MemberCreated
            | AuditAction::MemberUpdated
            | AuditAction::MemberDeleted => AuditTarget::Member,
            AuditAction::FileUploaded | AuditAction::FileShared | AuditAction::FileDeleted => {
                AuditTarget::File
            }
        }
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown audit action '{s}'")))
    }
}

/// Kind of entity an audit entry refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditTarget {
    User,
    Role,
    Member,
    File,
}

impl AuditTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditTarget::User => "user",
            AuditTarget::Role => "role",
            AuditTarget::Member => "member",
            AuditTarget::File => "file",
        }
    }
}

impl core::fmt::Display for AuditTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditTarget {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(AuditTarget::User),
            "role" => Ok(AuditTarget::Role),
            "member" => Ok(AuditTarget::Member),
            "file" => Ok(AuditTarget::File),
            other => Err(DomainError::validation(format!("unknown audit target '{other}'"))),
        }
    }
}

/// A recorded audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: AuditLogId,
    /// `None` for system actions (bootstrap).
    pub actor_id: Option<UserId>,
    pub action: AuditAction,
    pub target_type: AuditTarget,
    pub target_id: Option<i64>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Entry to append. The store assigns id and keeps `created_at` as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub actor_id: Option<UserId>,
    pub action: AuditAction,
    pub target_type: AuditTarget,
    pub target_id: Option<i64>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewAuditEntry {
    /// Entry for `action` against the action's natural target type.
    pub fn new(actor_id: Option<UserId>, action: AuditAction, created_at: DateTime<Utc>) -> Self {
        Self {
            actor_id,
            action,
            target_type: action.target(),
            target_id: None,
            details: None,
            created_at,
        }
    }

    pub fn target(mut self, id: impl Into<i64>) -> Self {
        self.target_id = Some(id.into());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}
