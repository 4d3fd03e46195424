//! Infrastructure layer: persistence, configuration, application services
//! and startup bootstrap.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod services;
pub mod store;

mod integration_tests;

pub use bootstrap::{BootstrapReport, bootstrap, default_roles};
pub use config::{ConfigError, EnvironmentProvider, PublicSettings, Settings, SystemEnvironment};
pub use error::{PortalError, PortalResult};
pub use services::PortalServices;
pub use store::{InMemoryPortalStore, PortalStore, PostgresPortalStore, SharedStore};
