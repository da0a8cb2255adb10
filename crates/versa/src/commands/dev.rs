//! Development server command.

use std::sync::Arc;

use anyhow::Result;
use versa_server::{DevServer, DevServerConfig};
use versa_static::{BuildConfig, SiteRenderer};

/// Build once, then serve and rebuild on change.
pub async fn run(config: Arc<BuildConfig>, open: bool) -> Result<()> {
    let result = super::build::run(Arc::clone(&config)).await?;

    let server_config = DevServerConfig {
        open,
        ..DevServerConfig::from_build(&config, result.plan.latest())
    };

    tracing::info!("Starting development server on port {}", server_config.port);

    let renderer = SiteRenderer::new(config, result.plan);
    DevServer::new(server_config, renderer).start().await?;

    Ok(())
}
