use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use docgate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let config = ServerConfig::load()?;
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "docgate",
        "docgate starting: RUST_LOG='{}', addr={}, admin={}, audit_log={:?}, max_rewrite_depth={}",
        rust_log, config.addr(), config.admin.as_deref().unwrap_or("<none>"), config.audit_log, config.max_rewrite_depth
    );

    docgate::server::run(config).await
}
