use portal_audit::{AuditLog, NewAuditEntry};
use portal_auth::{Permission, Principal};
use portal_core::Page;

use crate::error::PortalResult;
use crate::store::SharedStore;

/// Append-only audit trail.
pub struct AuditRecorder {
    store: SharedStore,
}

impl AuditRecorder {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Append one entry. Not retried: a store failure surfaces to the caller.
    pub async fn record(&self, entry: NewAuditEntry) -> PortalResult<AuditLog> {
        let log = self.store.append_audit(entry).await.inspect_err(|e| {
            tracing::error!(error = %e, "audit append failed");
        })?;
        tracing::debug!(action = %log.action, target = ?log.target_id, "audit recorded");
        Ok(log)
    }

    /// Newest first.
    pub async fn list(&self, principal: &Principal, page: Page) -> PortalResult<Vec<AuditLog>> {
        principal.require(&[Permission::ViewAuditLogs])?;
        Ok(self.store.list_audit(page).await?)
    }
}
