//! push-notifier: binary entrypoint.
//! Loads config, subscribes the configured channels and prints every
//! notification as a JSON line until Ctrl-C.

use anyhow::Context;
use push_notifier::metrics::Metrics;
use push_notifier::{Notifier, NotifierConfig, Scope, Video};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("push_notifier=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; missing file is fine.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = NotifierConfig::load_default().context("loading notifier config")?;
    let channels = config.channels.clone();

    let mut builder = Notifier::builder(config.clone());
    if config.metrics {
        let metrics = Metrics::init()?;
        builder = builder.routes(metrics.router());
    }
    let notifier = builder.build().context("building notifier")?;

    notifier.on_any(Scope::All, |video: Video| async move {
        match serde_json::to_string(&video) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = ?e, "cannot serialize notification"),
        }
    })?;

    if channels.is_empty() {
        tracing::warn!("no channels configured (set `channels` or NOTIFIER_CHANNELS)");
    }
    notifier.subscribe(channels).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("ctrl-c received");
                cancel.cancel();
            }
        });
    }

    notifier.run(cancel).await?;
    Ok(())
}
