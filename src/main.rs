//! tap-proxy
//!
//! Transparent TCP forwarding proxy with HTTP request inspection.
//!
//! This binary:
//! - Accepts TCP connections and forwards them to one fixed upstream
//! - Inspects HTTP request lines to count accessed URLs
//! - Optionally blocks targets by substring and injects a request header
//! - Drains in-flight sessions and reports the top URLs on shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tap_proxy::config::Config;
use tap_proxy::proxy::stats;
use tap_proxy::proxy::{Listener, ListenerConfig, RequestPolicy, UrlStats};
use tap_proxy::shutdown::ShutdownController;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Initialize tracing (prefer RUST_LOG, fallback to --log-level)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tap-proxy");
    info!(
        listen = %SocketAddr::new(config.ip, config.port),
        upstream = %config.server,
        block = config.block.as_deref().unwrap_or("-"),
        inject_header = config.inject_header.as_deref().unwrap_or("-"),
        "Configuration loaded"
    );

    std::fs::create_dir_all(&config.log_dir).with_context(|| {
        format!(
            "Failed to create log directory: {}",
            config.log_dir.display()
        )
    })?;

    let urls = Arc::new(UrlStats::new());
    let policy = Arc::new(RequestPolicy::new(
        config.block.clone(),
        config.inject_header.clone(),
    ));
    let shutdown = ShutdownController::new();

    let listener = Listener::bind(
        ListenerConfig::new(SocketAddr::new(config.ip, config.port)),
        config.server.clone(),
        policy,
        Arc::clone(&urls),
    )
    .context("Failed to bind listener")?;
    let listener = Arc::new(listener);

    let mut accept_handle = tokio::spawn(Arc::clone(&listener).run(shutdown.subscribe()));

    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigtstp = signal(SignalKind::from_raw(libc::SIGTSTP))
        .context("Failed to install SIGTSTP handler")?;

    let mut accept_exited = false;
    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                break;
            }
            _ = sigtstp.recv() => {
                info!("Received SIGTSTP; suspending until SIGCONT");
                // Installing a handler replaced the default suspend action,
                // so re-raise as SIGSTOP to actually stop the process.
                unsafe {
                    libc::raise(libc::SIGSTOP);
                }
                info!("Resumed");
            }
            result = &mut accept_handle => {
                accept_exited = true;
                if let Err(e) = result {
                    error!(error = %e, "Accept loop panicked");
                }
                break;
            }
        }
    }

    if shutdown.trigger() {
        info!("Shutting down proxy");
    }
    if !accept_exited {
        let _ = accept_handle.await;
    }

    listener.drain().await;

    let top = urls.top_n(stats::REPORT_TOP_N).await;
    if top.is_empty() {
        info!("No URLs accessed");
    } else {
        info!("Top Accessed URLs:");
        for (url, count) in &top {
            info!("{}: {} times", url, count);
        }
    }

    let report_path = config.log_dir.join("top_urls.log");
    stats::write_report(&report_path, &top)?;
    info!(path = %report_path.display(), "Report written");

    info!("Shutdown complete");
    Ok(())
}
