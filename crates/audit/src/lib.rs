//! Audit trail vocabulary and records.
//!
//! Entries are append-only: there is no update or delete anywhere in the API.

pub mod entry;

pub use entry::{AuditAction, AuditLog, AuditTarget, NewAuditEntry};
