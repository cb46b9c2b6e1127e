//! Relay process: engine, downstream WebSocket server, admin HTTP server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use liverelay_daemon::{RelayEngine, WsServer};
use liverelay_upstream::BridgeConnector;

use crate::admin;
use crate::config::Settings;

/// Run until SIGINT/SIGTERM, then shut everything down in order.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    let engine = Arc::new(RelayEngine::new(
        settings.tenants.clone(),
        BridgeConnector::new(settings.upstream_url.as_str())
            .with_idle_timeout(Duration::from_millis(settings.relay.bridge_idle_timeout_ms)),
        settings.proxy_url.clone(),
        settings.relay.clone(),
        cancel.clone(),
    ));

    let ws = WsServer::new(
        settings.ws_addr,
        engine.fanout(),
        settings.ws_secret.as_str(),
        cancel.clone(),
    )
    .with_liveness(settings.relay.liveness.clone())
    .with_outbox_capacity(settings.relay.outbox_capacity)
    .with_max_connections(settings.relay.max_connections);

    // Bind both listeners before any upstream connects so a port clash
    // fails fast.
    let (ws_listener, _) = ws
        .bind()
        .await
        .with_context(|| format!("failed to bind ws listener on {}", settings.ws_addr))?;
    let admin_listener = TcpListener::bind(settings.admin_addr)
        .await
        .with_context(|| format!("failed to bind admin listener on {}", settings.admin_addr))?;

    let ws_handle = tokio::spawn(async move { ws.serve(ws_listener).await });
    let admin_handle = tokio::spawn(admin::serve(
        admin_listener,
        admin::router(Arc::clone(&engine), settings.admin_secret.clone()),
        cancel.clone(),
    ));

    engine.start().await;
    tracing::info!(
        tenants = settings.tenants.len(),
        active = settings.active_tenants(),
        proxied = settings.proxy_url.is_some(),
        "liverelay running"
    );

    let signal = tokio::select! {
        result = shutdown_signal() => result,
        _ = cancel.cancelled() => Ok(()),
    };
    if let Err(e) = &signal {
        tracing::error!(error = %e, "failed to install signal handlers, shutting down");
    }

    tracing::info!("shutting down");
    cancel.cancel();
    engine.shutdown().await;

    match ws_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "ws server failed"),
        Err(e) => tracing::error!(error = %e, "ws server task panicked"),
    }
    match admin_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "admin server failed"),
        Err(e) => tracing::error!(error = %e, "admin server task panicked"),
    }

    tracing::info!("liverelay stopped");
    signal.context("signal handling")
}

/// Resolve on the first SIGINT or SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("received SIGINT");
            }
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("received SIGINT");
    }
    Ok(())
}
