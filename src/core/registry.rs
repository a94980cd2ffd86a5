//! Route registry: projects the store's catalog into the live table.
//!
//! Every mutation of the catalog triggers a reload. A reload is always a
//! full recompile from [`ApiStore::list`], deduplicated by stem, followed
//! by one atomic replace on the [`ConfigurableServer`]. Because each
//! reload starts from the whole catalog, a failed reload leaves the live
//! table stale but self-heals on the next successful one (or on startup);
//! the committed store row is never rolled back.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
    core::table::{CompiledRoute, ProxyTable, UpstreamParseError, UpstreamTarget},
    metrics,
    ports::ConfigurableServer,
    store::{ApiStore, StoreError, models::ApiConfig},
};

/// Errors surfaced by registry operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("cannot compile route for {path}: {source}")]
    Compile {
        path: String,
        source: UpstreamParseError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("configuration replace failed: {0}")]
    Replace(String),

    #[error("server did not become ready within {0:?}")]
    NotReady(Duration),
}

/// Compile one stored config into a table entry.
pub fn compile_route(config: &ApiConfig) -> Result<CompiledRoute, RegistryError> {
    let target = UpstreamTarget::parse(&config.upstream).map_err(|source| {
        RegistryError::Compile {
            path: config.path.clone(),
            source,
        }
    })?;

    Ok(CompiledRoute {
        path: config.path.clone(),
        stem: config.stem().to_string(),
        methods: config.methods.clone(),
        target,
    })
}

/// Owns the compile-and-submit sequence for the proxy listener.
pub struct Registry {
    store: ApiStore,
    server: Arc<dyn ConfigurableServer>,
    // Serializes the read-modify-write around table assembly.
    reload_lock: Mutex<()>,
}

impl Registry {
    pub fn new(store: ApiStore, server: Arc<dyn ConfigurableServer>) -> Self {
        Self {
            store,
            server,
            reload_lock: Mutex::new(()),
        }
    }

    /// Recompile the whole catalog and hot-swap the live table.
    pub async fn reload(&self) -> Result<(), RegistryError> {
        let _guard = self.reload_lock.lock().await;

        let configs = self.store.list().await?;
        let mut table = ProxyTable::new();
        for config in &configs {
            table.upsert(compile_route(config)?);
        }

        let route_count = table.len();
        self.server
            .replace(table)
            .map_err(|e| RegistryError::Replace(e.to_string()))?;

        metrics::record_registry_reload("success");
        tracing::info!(routes = route_count, "routing table reloaded");
        Ok(())
    }

    /// Startup path: wait for the server to come up (fixed 1 s poll,
    /// bounded), then perform the first full compile. Proxy traffic
    /// served before this completes sees an empty table and gets 404.
    pub async fn run_initial_load(&self, max_wait: Duration) -> Result<(), RegistryError> {
        let poll = Duration::from_secs(1);
        let mut waited = Duration::ZERO;

        while !self.server.is_ready() {
            if waited >= max_wait {
                return Err(RegistryError::NotReady(max_wait));
            }
            tracing::debug!("server not ready, waiting for management API");
            tokio::time::sleep(poll).await;
            waited += poll;
        }

        tracing::info!("server ready, loading routes from catalog");
        self.reload().await
    }
}
