use std::sync::Arc;

use anyhow::Context;
use nexuscrm_infra::CrossModuleConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nexuscrm_observability::init();

    let config = CrossModuleConfig::from_env().context("invalid NEXUSCRM_* configuration")?;
    let services = nexuscrm_api::app::services::build_services(&config)?;
    let app = nexuscrm_api::app::build_app(Arc::new(services));

    let addr = std::env::var("NEXUSCRM_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
