use std::{sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{Result, eyre::Context};
use veil_gateway::{
    adapters::{
        ArcSwapServer, ManagementState, ProxyState, UpstreamClientAdapter, management_router,
        proxy_router,
    },
    config::{Args, GatewayConfig},
    core::Registry,
    events,
    metrics,
    ports::{ConfigurableServer, EventQueue},
    store::ApiStore,
    tracing_setup,
    utils::GracefulShutdown,
};

/// How long the registry waits for the listeners before giving up on the
/// initial route load.
const INITIAL_LOAD_WAIT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    if args.console_logs {
        tracing_setup::init_console_tracing()?;
    } else {
        tracing_setup::init_tracing()?;
    }
    metrics::describe_metrics();

    let config = GatewayConfig::from_args(&args).context("invalid configuration")?;

    let store = ApiStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open catalog database at {}", config.db_path))?;
    store
        .migrate()
        .await
        .context("failed to run database migrations")?;
    tracing::info!(db_path = %config.db_path, "catalog database ready");

    let event_queue: Option<Arc<dyn EventQueue>> = if config.event_streaming {
        let queue = events::build_queue(config.events_endpoint.as_deref());
        queue.start();
        Some(queue)
    } else {
        tracing::info!("event streaming disabled");
        None
    };

    let server = Arc::new(ArcSwapServer::new());
    let registry = Arc::new(Registry::new(store.clone(), server.clone()));

    let table_server: Arc<dyn ConfigurableServer> = server.clone();
    let proxy_state = Arc::new(ProxyState {
        server: table_server,
        store: store.clone(),
        client: Arc::new(UpstreamClientAdapter::new().context("failed to create upstream client")?),
        events: event_queue.clone(),
        key_header: config.subscription_key_header.clone(),
    });
    let management_state = Arc::new(ManagementState {
        store: store.clone(),
        registry: registry.clone(),
    });

    let management_listener = tokio::net::TcpListener::bind(config.management_addr)
        .await
        .with_context(|| format!("failed to bind management listener {}", config.management_addr))?;
    let proxy_listener = tokio::net::TcpListener::bind(config.proxy_addr)
        .await
        .with_context(|| format!("failed to bind proxy listener {}", config.proxy_addr))?;
    server.mark_ready();

    // First full compile runs in the background; proxy traffic answers
    // 404 from the empty table until it lands.
    {
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = registry.run_initial_load(INITIAL_LOAD_WAIT).await {
                tracing::error!(error = %e, "initial route load failed");
            }
        });
    }

    let shutdown = Arc::new(GracefulShutdown::new());
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = shutdown.run_signal_handler().await {
                tracing::error!(error = %e, "signal handler error");
            }
        });
    }

    tracing::info!(
        management = %config.management_addr,
        proxy = %config.proxy_addr,
        "Veil Gateway listening"
    );

    let management_server = axum::serve(management_listener, management_router(management_state))
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                shutdown.wait_for_shutdown_signal().await;
            }
        });
    let proxy_server =
        axum::serve(proxy_listener, proxy_router(proxy_state)).with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                shutdown.wait_for_shutdown_signal().await;
            }
        });

    let (management_result, proxy_result) = tokio::join!(
        async move { management_server.await },
        async move { proxy_server.await },
    );
    management_result.context("management listener error")?;
    proxy_result.context("proxy listener error")?;

    if let Some(queue) = event_queue {
        queue.stop().await;
    }

    tracing::info!("Veil Gateway stopped cleanly");
    Ok(())
}
