use serde::{Deserialize, Serialize};

use portal_auth::{CommandAuthorization, Permission};
use portal_core::{DomainError, DomainResult, Entity, OrganizationId};

/// An organization ("member") that users belong to and files are shared with.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub security_server_ip: Option<String>,
}

impl core::fmt::Debug for Organization {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Organization")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("security_server_ip", &self.security_server_ip)
            .finish_non_exhaustive()
    }
}

impl Entity for Organization {
    type Id = OrganizationId;
    const KIND: &'static str = "organization";
}

/// Command to register an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrganization {
    pub name: String,
    pub description: Option<String>,
    pub api_key: Option<String>,
    pub security_server_ip: Option<String>,
}

impl NewOrganization {
    pub fn validated(mut self) -> DomainResult<Self> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(DomainError::validation("organization name cannot be empty"));
        }
        if let Some(addr) = &self.security_server_ip {
            validate_address(addr)?;
        }
        Ok(self)
    }
}

impl CommandAuthorization for NewOrganization {
    fn required_permissions(&self) -> &'static [Permission] {
        &[Permission::ManageMembers]
    }
}

/// Partial update; only provided fields change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub api_key: Option<String>,
    pub security_server_ip: Option<String>,
}

impl OrganizationChanges {
    pub fn validated(mut self) -> DomainResult<Self> {
        if let Some(name) = self.name.take() {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(DomainError::validation("organization name cannot be empty"));
            }
            self.name = Some(name);
        }
        if let Some(addr) = &self.security_server_ip {
            validate_address(addr)?;
        }
        Ok(self)
    }

    pub fn apply_to(&self, org: &mut Organization) {
        if let Some(name) = &self.name {
            org.name = name.clone();
        }
        if let Some(description) = &self.description {
            org.description = Some(description.clone());
        }
        if let Some(api_key) = &self.api_key {
            org.api_key = Some(api_key.clone());
        }
        if let Some(addr) = &self.security_server_ip {
            org.security_server_ip = Some(addr.clone());
        }
    }
}

impl CommandAuthorization for OrganizationChanges {
    fn required_permissions(&self) -> &'static [Permission] {
        &[Permission::ManageMembers]
    }
}

// Hint only: hostnames are allowed, so this is a shape check, not an IP parse.
fn validate_address(addr: &str) -> DomainResult<()> {
    if addr.trim().is_empty() || addr.chars().any(char::is_whitespace) {
        return Err(DomainError::validation("security server address is malformed"));
    }
    Ok(())
}
