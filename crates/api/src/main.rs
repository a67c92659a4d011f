use std::sync::Arc;

use anyhow::Context;

use forgeops_events::{AuditSink, TracingAuditSink};
use forgeops_infra::AppConfig;
use forgeops_observability::TracingConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;

    forgeops_observability::tracing::init(&TracingConfig {
        format: config.log_format,
        ..TracingConfig::default()
    });

    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let services = match config.database_url.as_deref() {
        Some(url) => {
            tracing::info!("using postgres stores");
            forgeops_api::app::services::postgres_services(&config, url, audit).await?
        }
        None => {
            if config.dev_secret_key {
                tracing::warn!("FORGEOPS_SECRET_KEY not set; using insecure dev key");
            }
            tracing::warn!("DATABASE_URL not set; state is kept in memory and lost on exit");
            forgeops_api::app::services::in_memory_services(&config, audit)?
        }
    };

    if services.operator.is_none() {
        tracing::warn!("FORGEOPS_OPERATOR_TOKEN not set; operator endpoints are closed");
    }

    let app = forgeops_api::app::build_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
