//! Members domain module (organizations participating in the portal).
//!
//! Pure data model and validation; persistence lives in `portal-infra`.

pub mod organization;

pub use organization::{NewOrganization, Organization, OrganizationChanges};
