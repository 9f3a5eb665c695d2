mod config;
mod error;
mod models;
mod netbox;
mod pipeline;
mod render;
mod session;
mod store;
mod utils;

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use netbox::{NetBoxClient, NetBoxStore};
use pipeline::Orchestrator;
use render::ConfigRenderer;
use session::ssh::SshSessionFactory;
use session::SessionPool;

#[tokio::main]
async fn main() {
    let dotenv = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wan_provision=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = dotenv {
        tracing::debug!("No .env file loaded: {}", e);
    }

    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<i32> {
    // Load configuration
    let cfg = Config::load()?;
    tracing::info!("Starting WAN provisioning");
    tracing::info!("NetBox: {}", cfg.netbox_url);
    tracing::info!("Device role: {}", cfg.device_role);
    tracing::info!("Max sessions: {}", cfg.max_sessions);

    let client = NetBoxClient::new(
        cfg.netbox_url.clone(),
        cfg.netbox_token.clone(),
        Duration::from_secs(cfg.netbox_timeout_secs),
    )?;
    if !client.test_connection().await {
        tracing::warn!("NetBox at {} did not answer the status check", cfg.netbox_url);
    }
    let store = Arc::new(NetBoxStore::new(client, cfg.device_role.clone(), cfg.production_role.clone()));

    let renderer = match &cfg.templates_dir {
        Some(dir) => ConfigRenderer::from_dir(dir)?,
        None => ConfigRenderer::builtin()?,
    };

    let factory = Arc::new(SshSessionFactory::new(cfg.ssh.clone()));
    let pool = SessionPool::new(factory, cfg.max_sessions);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::warn!("Shutdown requested, finishing in-flight pushes");
            cancel.cancel();
        });
    }

    let orchestrator = Orchestrator::new(store, Arc::new(renderer), pool, cfg.pipeline_settings(), cancel);
    let report = orchestrator.run().await?;

    println!("{}", report.summary());
    Ok(report.exit_code())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => { sig.recv().await; }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
