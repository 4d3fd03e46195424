use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use portal_core::DomainError;

/// Capability token gating a class of portal operations.
///
/// The vocabulary is closed: strings outside it are rejected when a role is
/// created or updated instead of being stored and silently never matching.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "manage:users")]
    ManageUsers,
    #[serde(rename = "manage:roles")]
    ManageRoles,
    #[serde(rename = "manage:members")]
    ManageMembers,
    #[serde(rename = "manage:settings")]
    ManageSettings,
    #[serde(rename = "manage:files")]
    ManageFiles,
    #[serde(rename = "view:audit_logs")]
    ViewAuditLogs,
}

/// Effective permission set of a principal (ordered for stable output).
pub type PermissionSet = BTreeSet<Permission>;

impl Permission {
    pub const ALL: [Permission; 6] = [
        Permission::ManageUsers,
        Permission::ManageRoles,
        Permission::ManageMembers,
        Permission::ManageSettings,
        Permission::ManageFiles,
        Permission::ViewAuditLogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ManageUsers => "manage:users",
            Permission::ManageRoles => "manage:roles",
            Permission::ManageMembers => "manage:members",
            Permission::ManageSettings => "manage:settings",
            Permission::ManageFiles => "manage:files",
            Permission::ViewAuditLogs => "view:audit_logs",
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown permission '{s}'")))
    }
}

/// Parse a list of permission strings into a set, collapsing duplicates.
pub fn parse_permissions<I, S>(raw: I) -> Result<PermissionSet, DomainError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter().map(|s| s.as_ref().parse()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_permission_string() {
        for p in Permission::ALL {
            assert_eq!(p.as_str().parse::<Permission>().unwrap(), p);
        }
    }

    #[test]
    fn rejects_unknown_strings() {
        let err = "manage:everything".parse::<Permission>().unwrap_err();
        assert!(err.to_string().contains("manage:everything"));
    }

    #[test]
    fn parse_collapses_duplicates() {
        let set = parse_permissions(["manage:files", "manage:files", "view:audit_logs"]).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&Permission::ViewAuditLogs).unwrap();
        assert_eq!(json, "\"view:audit_logs\"");
    }
}
