// Relay entry point.
//
// Startup sequence:
// 1. Initialize tracing (stderr, env-filtered)
// 2. Load config (copying defaults on first run, applying env overrides)
// 3. Build the upstream client (active or disabled depending on the key)
// 4. Bind the listener and serve until Ctrl+C

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use promptlens::config;
use promptlens::relay::{server, RelayContext, RelayListener};
use promptlens::upstream::{Upstream, UpstreamClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    info!("Relay starting up");

    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: port={}, upstream={}, chat_model={}, image_model={}",
        config.server.port,
        config.upstream.base_url,
        config.upstream.chat_model,
        config.upstream.image_model
    );

    let upstream = UpstreamClient::from_config(&config);
    match &upstream {
        UpstreamClient::Active(_) => info!("Upstream client initialized (API key configured)"),
        UpstreamClient::Disabled => info!(
            "Upstream client disabled (no API key); every request will fail with a 500"
        ),
    }

    let ctx = Arc::new(RelayContext {
        upstream: Arc::new(upstream) as Arc<dyn Upstream>,
        variation_count: config.upstream.variation_count,
    });

    let listener = RelayListener::bind(config.server.port)
        .await
        .with_context(|| format!("failed to bind port {}", config.server.port))?;

    tokio::select! {
        result = server::run(listener, ctx) => {
            result.context("relay server error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down");
        }
    }

    info!("Relay shut down cleanly");
    Ok(())
}

/// Initialize tracing to stderr with an env-filter default.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("promptlens=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
