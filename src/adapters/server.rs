//! In-process implementation of the configurable server port.
//!
//! The live routing table is an `ArcSwap` snapshot: `replace` stores a
//! whole new table and readers that already loaded the previous `Arc`
//! finish their request on it.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use arc_swap::ArcSwap;

use crate::{
    core::table::ProxyTable,
    ports::{ConfigurableServer, ReplaceError},
};

pub struct ArcSwapServer {
    table: ArcSwap<ProxyTable>,
    ready: AtomicBool,
}

impl ArcSwapServer {
    /// Starts with an empty table; proxy traffic gets 404 until the
    /// first reload lands.
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(ProxyTable::new()),
            ready: AtomicBool::new(false),
        }
    }

    /// Flip readiness once the listeners are bound.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }
}

impl Default for ArcSwapServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurableServer for ArcSwapServer {
    fn current(&self) -> Arc<ProxyTable> {
        self.table.load_full()
    }

    fn replace(&self, table: ProxyTable) -> Result<(), ReplaceError> {
        self.table.store(Arc::new(table));
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::{CompiledRoute, UpstreamTarget};

    fn route(stem: &str) -> CompiledRoute {
        CompiledRoute {
            path: format!("{stem}/*"),
            stem: stem.to_string(),
            methods: vec![],
            target: UpstreamTarget::parse("http://h:8080").unwrap(),
        }
    }

    #[test]
    fn replace_swaps_whole_snapshot() {
        let server = ArcSwapServer::new();
        assert!(server.current().is_empty());

        let before = server.current();

        let mut table = ProxyTable::new();
        table.upsert(route("/weather"));
        server.replace(table).unwrap();

        // Readers holding the old snapshot still see it.
        assert!(before.is_empty());
        assert_eq!(server.current().len(), 1);
    }

    #[test]
    fn readiness_starts_false() {
        let server = ArcSwapServer::new();
        assert!(!server.is_ready());
        server.mark_ready();
        assert!(server.is_ready());
    }
}
