//! # Machine
//!
//! The process-wide runtime: one graph store, one archetype registry, one
//! worker pool and the system root. Sessions are opened against a machine,
//! one per acting root.

use crate::anchor::Anchor;
use crate::archetype::{Archetype, Root};
use crate::concurrency::WorkerPool;
use crate::graph::{GraphStore, MemoryGraph};
use crate::primitives;
use crate::registry::ArchetypeRegistry;
use crate::session::Session;
use crate::storage::RedbGraph;
use crate::types::{AnchorId, WaypointError};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Tunables of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// Worker threads in the pool.
    pub workers: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            workers: primitives::DEFAULT_WORKER_THREADS,
        }
    }
}

/// Shared runtime state.
pub struct Machine {
    store: Arc<dyn GraphStore>,
    registry: Arc<ArchetypeRegistry>,
    system_root: Anchor,
    pool: WorkerPool,
    config: MachineConfig,
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("store", &self.store)
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Machine {
    /// A machine over a fresh in-memory store.
    pub fn in_memory() -> Result<Arc<Self>, WaypointError> {
        Self::with_store(
            Arc::new(MemoryGraph::new()),
            Arc::new(ArchetypeRegistry::new()),
            MachineConfig::default(),
        )
    }

    /// A machine over a redb file. Every archetype stored in the file must
    /// already be registered in `registry`.
    pub fn open(
        path: impl AsRef<Path>,
        registry: Arc<ArchetypeRegistry>,
        config: MachineConfig,
    ) -> Result<Arc<Self>, WaypointError> {
        let store = RedbGraph::open(path, Arc::clone(&registry))?;
        Self::with_store(Arc::new(store), registry, config)
    }

    /// A machine over any store. Loads the system root, creating it on
    /// first use.
    pub fn with_store(
        store: Arc<dyn GraphStore>,
        registry: Arc<ArchetypeRegistry>,
        config: MachineConfig,
    ) -> Result<Arc<Self>, WaypointError> {
        let system_root = match store.find_by_id(AnchorId::SUPER_ROOT)? {
            Some(anchor) => anchor,
            None => {
                let anchor = Anchor::with_id(AnchorId::SUPER_ROOT, Box::new(Root));
                store.put(&anchor)?;
                tracing::info!("system root created");
                anchor
            }
        };
        let pool = WorkerPool::new(config.workers)?;
        Ok(Arc::new(Self {
            store,
            registry,
            system_root,
            pool,
            config,
        }))
    }

    #[must_use]
    pub fn store(&self) -> &dyn GraphStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn registry(&self) -> &ArchetypeRegistry {
        &self.registry
    }

    #[must_use]
    pub fn system_root(&self) -> &Anchor {
        &self.system_root
    }

    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    #[must_use]
    pub fn config(&self) -> MachineConfig {
        self.config
    }

    /// Create and store a new user root.
    pub fn create_root(&self) -> Result<Anchor, WaypointError> {
        let root = Anchor::new(Box::new(Root));
        self.store.put(&root)?;
        tracing::info!(root = %root.id(), "root created");
        Ok(root)
    }

    /// Ids of every root, the system root included.
    pub fn roots(&self) -> Result<Vec<AnchorId>, WaypointError> {
        let mut roots = Vec::new();
        for id in self.store.ids()? {
            if let Some(anchor) = self.store.find_by_id(id)? {
                if anchor.type_name()? == Root::NAME {
                    roots.push(id);
                }
            }
        }
        Ok(roots)
    }

    /// Open a session acting as `root`; `None` acts as the system root.
    pub fn session(self: &Arc<Self>, root: Option<AnchorId>) -> Result<Session, WaypointError> {
        let root = match root {
            None => self.system_root.clone(),
            Some(id) => {
                let anchor = self.store.get(id)?;
                if anchor.type_name()? != Root::NAME {
                    return Err(WaypointError::InvalidTarget(format!("{} is not a root", id)));
                }
                anchor
            }
        };
        Ok(Session::new(Arc::clone(self), root))
    }

    /// Write pending persistent anchors.
    pub fn commit(&self) -> Result<(), WaypointError> {
        self.store.commit()
    }

    /// Commit, then drop transient anchors.
    pub fn close(&self) -> Result<(), WaypointError> {
        self.store.close()
    }
}

// =============================================================================
// TESTS
// =============================================================================
