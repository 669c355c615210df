//! eth-loadtest - JSON-RPC load generator for Ethereum-compatible nodes
//!
//! Runs a configured scenario of virtual users sending transactions through
//! one endpoint, while a block poller reports block-level throughput for the
//! same endpoint.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use eth_loadtest::config::Settings;
use eth_loadtest::metrics::{MetricsServer, MetricsSink, NoopSink, PrometheusSink};
use eth_loadtest::poller::PollerRegistry;
use eth_loadtest::scenario::ScenarioRunner;
use eth_loadtest::{wallet, Client};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    if std::env::args().nth(1).as_deref() == Some("keygen") {
        let key = wallet::generate_key();
        println!("{}", serde_json::to_string_pretty(&key)?);
        return Ok(());
    }

    info!("Starting eth-loadtest v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} ({} vus)",
        settings.client.url(),
        settings.scenario.vus
    );

    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let sink: Arc<dyn MetricsSink> = if settings.metrics.enabled {
        Arc::new(PrometheusSink)
    } else {
        Arc::new(NoopSink)
    };
    let client = Client::connect(&settings.client, &settings.receipts, sink.clone()).await?;

    // Keep the handle alive for the whole run; dropping it stops the poller
    let registry = PollerRegistry::new(settings.poller.clone(), sink);
    let _poller = if settings.poller.enabled {
        Some(registry.start_polling(client.endpoint(), client.chain()))
    } else {
        None
    };

    let runner = ScenarioRunner::new(client, settings.scenario.clone())?;

    tokio::select! {
        result = runner.run() => match result {
            Ok(report) => info!(
                "Sent {} transactions, {} mined, {} failed, {} timed out in {:?}",
                report.sent, report.mined, report.failed, report.timed_out, report.elapsed
            ),
            Err(e) => error!("Scenario failed: {}", e),
        },
        _ = shutdown_signal() => {
            warn!("Shutdown signal received, stopping scenario");
        }
    }

    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("eth-loadtest stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,eth_loadtest=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
