use std::sync::Arc;

use portal_files::LocalBlobStore;
use portal_infra::{
    InMemoryPortalStore, PortalResult, PortalServices, PostgresPortalStore, Settings, SharedStore,
    bootstrap,
};

/// Pick the store, open blob storage, wire services and seed defaults.
///
/// Postgres is used when `DATABASE_URL` is set, the in-memory store otherwise.
pub async fn build_services(settings: Settings) -> PortalResult<Arc<PortalServices>> {
    let settings = Arc::new(settings);

    let store: SharedStore = match &settings.database_url {
        Some(url) => {
            tracing::info!("using postgres store");
            Arc::new(PostgresPortalStore::connect(url).await?)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store");
            Arc::new(InMemoryPortalStore::new())
        }
    };
    let blobs = Arc::new(LocalBlobStore::new(&settings.upload_dir).await?);

    let services = PortalServices::new(settings.clone(), store, blobs)?;
    let report = bootstrap(services.store.as_ref(), services.hasher.as_ref(), &settings).await?;
    tracing::info!(
        admin = %report.admin_user.username,
        created = report.admin_created,
        "bootstrap complete"
    );

    Ok(Arc::new(services))
}
