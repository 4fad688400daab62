use anyhow::Result;
use chaingate_core::{
    checker::HealthCheckEngine,
    config::AppConfig,
    grpc::GrpcProxy,
    hooks::EventHooks,
    proxy::ProxyEngine,
    push::PushClient,
    registry::UpstreamRegistry,
    store::{GatewayStore, MemoryStore},
    types::ConfigEntry,
};
use rustls::crypto::{aws_lc_rs::default_provider, CryptoProvider};
use server::{
    admin::{admin_router, AdminState},
    router::{gateway_router, GatewayState},
};
use std::{net::SocketAddr, sync::Arc};
use tokio::{signal, sync::broadcast};
use tower::limit::ConcurrencyLimitLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Diagnostic logs go to stderr; stdout carries one JSON trace line per
/// proxied request and must stay clean for the log pipeline.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,chaingate_core={0},server={0}", config.logging.level))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format.as_str() == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> Result<()> {
    CryptoProvider::install_default(default_provider())
        .map_err(|e| anyhow::anyhow!("Failed to install crypto provider: {e:?}"))?;

    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("Configuration failed: {e}"))?;
    init_logging(&config);
    info!("Starting Chaingate gateway");

    let store: Arc<dyn GatewayStore> = Arc::new(MemoryStore::new());

    if !config.admin.user.is_empty() && !config.admin.password.is_empty() {
        store
            .put_config(ConfigEntry {
                module: "admin".to_string(),
                key: "basic_auth".to_string(),
                value: format!("{} {}", config.admin.user, config.admin.password),
            })
            .await
            .map_err(|e| anyhow::anyhow!("Admin credential seed failed: {e}"))?;
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let push = PushClient::from_env().map(Arc::new);
    if push.is_some() {
        info!("push sink configured");
    }
    let hooks = Arc::new(EventHooks::new(store.clone(), push));
    let hooks_handle = hooks.start(shutdown_tx.subscribe());

    let registry = Arc::new(UpstreamRegistry::new(store.clone()));
    let check_engine = Arc::new(
        HealthCheckEngine::new(
            store.clone(),
            registry,
            config.check_interval(),
            config.check_cache_ttl(),
        )
        .map_err(|e| anyhow::anyhow!("Health check engine init failed: {e}"))?,
    );
    let check_handle = check_engine.start_with_shutdown(shutdown_tx.subscribe());

    let grpc_proxy = Arc::new(GrpcProxy::new(store.clone(), config.grpc_refresh_interval()));
    let grpc_refresh_handle = grpc_proxy.start_refresh(shutdown_tx.subscribe());
    let grpc_addr: SocketAddr = format!("{}:{}", config.grpc.bind_address, config.grpc.bind_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid grpc bind address: {e}"))?;
    let mut grpc_shutdown_rx = shutdown_tx.subscribe();
    let grpc_handle = tokio::spawn(grpc_proxy.serve(grpc_addr, async move {
        let _ = grpc_shutdown_rx.recv().await;
    }));

    let engine = Arc::new(
        ProxyEngine::new(store.clone())
            .map_err(|e| anyhow::anyhow!("Proxy engine init failed: {e}"))?,
    );
    let app = gateway_router(GatewayState { engine, store: store.clone() })
        .layer(ConcurrencyLimitLayer::new(config.server.max_concurrent_requests))
        .merge(admin_router(AdminState { store }));

    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.bind_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address: {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "gateway listening");

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "server error occurred");
        let _ = shutdown_tx.send(());
        return Err(e.into());
    }

    let _ = shutdown_tx.send(());
    match grpc_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "grpc server error"),
        Err(e) => error!(error = %e, "grpc server task failed"),
    }
    check_handle.abort();
    grpc_refresh_handle.abort();
    hooks_handle.abort();
    info!("server shutdown complete");

    Ok(())
}
