use anyhow::Context;

use portal_infra::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    portal_observability::init();

    let settings = Settings::from_env().context("loading settings")?;
    tracing::info!(?settings, "starting {}", settings.app_name);
    let bind_addr = settings.bind_addr.clone();

    let services = portal_api::app::services::build_services(settings)
        .await
        .context("startup failed")?;
    let app = portal_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
