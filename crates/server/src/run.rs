// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level server assembly — shared by `main` and integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::agent::SessionFactory;
use crate::breaker::CircuitBreakerManager;
use crate::config::Config;
use crate::governor::ResourceGovernor;
use crate::hub::SubscriberHub;
use crate::manager::SessionManager;
use crate::metadata::MetadataStore;
use crate::protocol::{ServerFrame, PROTOCOL_VERSION};
use crate::replay::ReplayStore;
use crate::session_lock::SessionLockManager;
use crate::transport::{socket, stdio};
use crate::ui::ExtensionUiRegistry;
use crate::version::SessionVersionStore;

/// A fully wired server, listening but not yet draining signals.
///
/// Returned by [`prepare`] so tests can reach the manager and the bound
/// address before driving traffic.
pub struct PreparedServer {
    pub manager: Arc<SessionManager>,
    pub shutdown: CancellationToken,
    pub local_addr: Option<SocketAddr>,
    pub transports: Vec<String>,
    config: Config,
    stdio_task: Option<JoinHandle<()>>,
}

/// Build every component, bind transports, and broadcast `server_ready`.
pub async fn prepare(
    config: Config,
    factory: Arc<dyn SessionFactory>,
) -> anyhow::Result<PreparedServer> {
    let manager = SessionManager::new(
        factory,
        Arc::new(ResourceGovernor::new(config.governor())),
        Arc::new(SessionLockManager::new(config.locks())),
        Arc::new(ReplayStore::new(config.replay())),
        Arc::new(SessionVersionStore::new()),
        config.timeouts(),
        Arc::new(CircuitBreakerManager::new(config.breakers())),
        Arc::new(ExtensionUiRegistry::new(config.ui())),
        Arc::new(SubscriberHub::new()),
        Arc::new(MetadataStore::new(&config.data_dir())),
    );
    let shutdown = CancellationToken::new();

    let mut transports = Vec::new();
    let mut listener = None;
    let mut local_addr = None;
    if let Some(port) = config.port {
        let bound = TcpListener::bind((config.host.as_str(), port)).await?;
        local_addr = Some(bound.local_addr()?);
        listener = Some(bound);
        transports.push("socket".to_owned());
    }
    if config.stdio {
        transports.push("stdio".to_owned());
    }

    let ready = ServerFrame::ServerReady {
        version: env!("CARGO_PKG_VERSION").to_owned(),
        protocol_version: PROTOCOL_VERSION.to_owned(),
        transports: transports.clone(),
    };

    if let Some(listener) = listener {
        tokio::spawn(socket::serve(
            listener,
            Arc::clone(&manager),
            ready.clone(),
            shutdown.clone(),
        ));
    }
    let stdio_task = if config.stdio {
        Some(tokio::spawn(stdio::serve(Arc::clone(&manager), ready.clone(), shutdown.clone())))
    } else {
        None
    };

    // Maintenance sweep: rate windows, idempotency TTL, breaker reaping,
    // zombie and lifetime expiry.
    {
        let manager = Arc::clone(&manager);
        let token = shutdown.clone();
        let period = Duration::from_secs(config.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await; // immediate first tick carries no work
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => manager.sweep().await,
                }
            }
        });
    }

    manager.hub.broadcast_all(&ready);
    info!(
        transports = ?transports,
        addr = ?local_addr,
        "server ready (protocol {PROTOCOL_VERSION})"
    );

    Ok(PreparedServer { manager, shutdown, local_addr, transports, config, stdio_task })
}

impl PreparedServer {
    /// Serve until SIGINT/SIGTERM (or stdin EOF when stdio is the only
    /// transport), then run the graceful shutdown sequence.
    pub async fn run(mut self) -> anyhow::Result<()> {
        match self.stdio_task.take() {
            Some(task) if self.config.port.is_none() => {
                tokio::select! {
                    _ = wait_for_signal() => {}
                    _ = task => info!("stdin closed"),
                }
            }
            _ => wait_for_signal().await,
        }
        self.finish().await
    }

    /// Graceful stop: notify, drain, tear down, cancel transports.
    pub async fn finish(self) -> anyhow::Result<()> {
        let drain = Duration::from_secs(self.config.shutdown_drain_secs);
        self.manager.initiate_shutdown(drain).await;
        self.shutdown.cancel();
        self.manager.dispose_all_sessions().await;
        info!("shutdown complete");
        Ok(())
    }
}

/// Run a server to completion (production codepath).
pub async fn run(config: Config, factory: Arc<dyn SessionFactory>) -> anyhow::Result<()> {
    prepare(config, factory).await?.run().await
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / APIARY_LOG_LEVEL > RUST_LOG > default ("info").
    let filter = if std::env::var("APIARY_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Errors mean a subscriber is already installed (tests); keep it.
    let _ = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
}
