//! # redb-backed Graph Storage
//!
//! A disk-backed [`GraphStore`] using the redb embedded database.
//!
//! Anchors are kept in a write-back cache. Lookups that miss the cache decode
//! the durable record and cache the result, so every handle to one id shares
//! one cell for the lifetime of the store. [`GraphStore::commit`] writes all
//! cached persistent anchors and all pending removals in a single ACID
//! transaction; transient anchors never reach disk.

use crate::anchor::Anchor;
use crate::formats::{record_from_bytes, record_to_bytes};
use crate::graph::GraphStore;
use crate::primitives;
use crate::registry::ArchetypeRegistry;
use crate::types::{AnchorId, WaypointError};
use parking_lot::RwLock;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

/// Table for anchors: AnchorId(u128) -> encoded AnchorRecord
const ANCHORS: TableDefinition<u128, &[u8]> = TableDefinition::new("anchors");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

fn io_err(e: impl std::fmt::Display) -> WaypointError {
    WaypointError::IoError(e.to_string())
}

/// A disk-backed anchor store using redb.
pub struct RedbGraph {
    db: Database,
    registry: Arc<ArchetypeRegistry>,
    /// Anchors loaded or created since the store was opened.
    cache: RwLock<BTreeMap<AnchorId, Anchor>>,
    /// Ids removed since the last commit.
    removed: RwLock<BTreeSet<AnchorId>>,
}

impl std::fmt::Debug for RedbGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbGraph")
            .field("cache_size", &self.cache.read().len())
            .field("pending_removals", &self.removed.read().len())
            .finish_non_exhaustive()
    }
}

impl RedbGraph {
    /// Open or create an anchor database at the given path.
    ///
    /// `registry` decodes archetype fields of loaded records, so every
    /// archetype type stored in the file must be registered before it is
    /// looked up.
    pub fn open(
        path: impl AsRef<Path>,
        registry: Arc<ArchetypeRegistry>,
    ) -> Result<Self, WaypointError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(ANCHORS).map_err(io_err)?;
            let mut meta = write_txn.open_table(METADATA).map_err(io_err)?;
            let version = meta.get("format_version").map_err(io_err)?.map(|v| v.value());
            match version {
                Some(v) if v != u64::from(primitives::FORMAT_VERSION) => {
                    return Err(WaypointError::DeserializationError(format!(
                        "database format version {} (expected {})",
                        v,
                        primitives::FORMAT_VERSION
                    )));
                }
                Some(_) => {}
                None => {
                    meta.insert("format_version", u64::from(primitives::FORMAT_VERSION))
                        .map_err(io_err)?;
                }
            }
            drop(meta);
            write_txn.commit().map_err(io_err)?;
        }

        Ok(Self {
            db,
            registry,
            cache: RwLock::new(BTreeMap::new()),
            removed: RwLock::new(BTreeSet::new()),
        })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), WaypointError> {
        self.commit()?;
        self.db.compact().map_err(io_err)?;
        Ok(())
    }

    /// Number of anchors written durably.
    pub fn durable_len(&self) -> Result<u64, WaypointError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(ANCHORS).map_err(io_err)?;
        table.len().map_err(io_err)
    }

    /// Handles to every cached anchor, taken under a short read lock.
    fn snapshot(&self) -> Vec<Anchor> {
        self.cache.read().values().cloned().collect()
    }

    fn load(&self, id: AnchorId) -> Result<Option<Anchor>, WaypointError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(ANCHORS).map_err(io_err)?;
        let Some(bytes) = table.get(id.as_u128()).map_err(io_err)? else {
            return Ok(None);
        };
        let record = record_from_bytes(bytes.value())?;
        let anchor = Anchor::from_record(record, &self.registry)?;
        if !anchor.is_populated() {
            return Err(WaypointError::DeserializationError(format!(
                "stored record for {} is a stub",
                id
            )));
        }
        Ok(Some(anchor))
    }
}

impl GraphStore for RedbGraph {
    fn find_by_id(&self, id: AnchorId) -> Result<Option<Anchor>, WaypointError> {
        if self.removed.read().contains(&id) {
            return Ok(None);
        }
        if let Some(anchor) = self.cache.read().get(&id) {
            return Ok(Some(anchor.clone()));
        }
        let Some(loaded) = self.load(id)? else {
            return Ok(None);
        };
        // A concurrent loader may have cached the id first; keep its cell.
        let mut cache = self.cache.write();
        Ok(Some(cache.entry(id).or_insert(loaded).clone()))
    }

    fn put(&self, anchor: &Anchor) -> Result<(), WaypointError> {
        anchor.cell()?;
        self.removed.write().remove(&anchor.id());
        self.cache.write().insert(anchor.id(), anchor.clone());
        Ok(())
    }

    fn remove(&self, id: AnchorId) -> Result<bool, WaypointError> {
        let cached = self.cache.write().remove(&id).is_some();
        let present = if cached {
            true
        } else {
            let read_txn = self.db.begin_read().map_err(io_err)?;
            let table = read_txn.open_table(ANCHORS).map_err(io_err)?;
            table.get(id.as_u128()).map_err(io_err)?.is_some()
        };
        let newly_removed = self.removed.write().insert(id);
        Ok(present && newly_removed)
    }

    fn ids(&self) -> Result<Vec<AnchorId>, WaypointError> {
        let mut ids: BTreeSet<AnchorId> = self.cache.read().keys().copied().collect();
        {
            let read_txn = self.db.begin_read().map_err(io_err)?;
            let table = read_txn.open_table(ANCHORS).map_err(io_err)?;
            for entry in table.iter().map_err(io_err)? {
                let (key, _) = entry.map_err(io_err)?;
                ids.insert(AnchorId::from_u128(key.value()));
            }
        }
        let removed = self.removed.read();
        Ok(ids.into_iter().filter(|id| !removed.contains(id)).collect())
    }

    fn commit(&self) -> Result<(), WaypointError> {
        // Encode from a snapshot: neither the cache lock nor archetype
        // locks are held while the other is taken, or while redb fsyncs.
        let mut encoded = Vec::new();
        for anchor in self.snapshot() {
            if anchor.is_persistent()? {
                encoded.push((anchor.id(), record_to_bytes(&anchor.to_record()?)?));
            }
        }
        let removed: Vec<AnchorId> = self.removed.read().iter().copied().collect();

        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(ANCHORS).map_err(io_err)?;
            for (id, bytes) in &encoded {
                table
                    .insert(id.as_u128(), bytes.as_slice())
                    .map_err(io_err)?;
            }
            for id in &removed {
                table.remove(id.as_u128()).map_err(io_err)?;
            }
            let count = table.len().map_err(io_err)?;
            let mut meta = write_txn.open_table(METADATA).map_err(io_err)?;
            meta.insert("anchor_count", count).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;

        let mut pending = self.removed.write();
        for id in &removed {
            pending.remove(id);
        }
        tracing::debug!(
            written = encoded.len(),
            removed = removed.len(),
            "redb store committed"
        );
        Ok(())
    }

    fn close(&self) -> Result<(), WaypointError> {
        self.commit()?;
        let transient: Vec<AnchorId> = self
            .snapshot()
            .iter()
            .filter(|anchor| !anchor.is_persistent().unwrap_or(false))
            .map(Anchor::id)
            .collect();
        let mut cache = self.cache.write();
        for id in &transient {
            cache.remove(id);
        }
        tracing::debug!(dropped = transient.len(), "redb store closed");
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::archetype::{GenericEdge, Root};
    use tempfile::tempdir;

    fn open(path: &Path) -> RedbGraph {
        RedbGraph::open(path, Arc::new(ArchetypeRegistry::new())).expect("open db")
    }

    #[test]
    fn commit_writes_only_persistent_anchors() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");
        let graph = open(&db_path);

        let root = Anchor::new(Box::new(Root));
        let edge = Anchor::new(Box::new(GenericEdge));
        graph.put(&root).expect("put");
        graph.put(&edge).expect("put");
        graph.commit().expect("commit");

        assert_eq!(graph.durable_len().expect("len"), 1);
        assert_eq!(graph.len().expect("len"), 2);
    }

    #[test]
    fn persistence_across_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");
        let root = Anchor::new(Box::new(Root));

        {
            let graph = open(&db_path);
            graph.put(&root).expect("put");
            graph.close().expect("close");
        }

        let graph = open(&db_path);
        let loaded = graph.find_by_id(root.id()).expect("find").expect("present");
        assert_eq!(loaded, root);
        assert_eq!(loaded.is_persistent(), Ok(true));
        assert_eq!(graph.ids().expect("ids"), vec![root.id()]);
    }

    #[test]
    fn loads_share_one_cell() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");
        let root = Anchor::new(Box::new(Root));
        {
            let graph = open(&db_path);
            graph.put(&root).expect("put");
            graph.commit().expect("commit");
        }

        let graph = open(&db_path);
        let first = graph.get(root.id()).expect("get");
        let second = graph.get(root.id()).expect("get");
        assert!(Arc::ptr_eq(first.cell().expect("cell"), second.cell().expect("cell")));
    }

    #[test]
    fn removal_is_durable_after_commit() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");
        let root = Anchor::new(Box::new(Root));
        {
            let graph = open(&db_path);
            graph.put(&root).expect("put");
            graph.commit().expect("commit");
            assert_eq!(graph.remove(root.id()), Ok(true));
            assert_eq!(graph.find_by_id(root.id()).expect("find"), None);
            graph.commit().expect("commit");
        }

        let graph = open(&db_path);
        assert_eq!(graph.find_by_id(root.id()).expect("find"), None);
        assert_eq!(graph.durable_len().expect("len"), 0);
    }

    #[test]
    fn close_drops_transient_from_cache() {
        let temp = tempdir().expect("temp dir");
        let graph = open(&temp.path().join("test.redb"));
        let edge = Anchor::new(Box::new(GenericEdge));
        graph.put(&edge).expect("put");
        graph.close().expect("close");
        assert_eq!(graph.find_by_id(edge.id()).expect("find"), None);
    }

    #[test]
    fn commit_does_not_block_puts_while_an_archetype_is_locked() {
        let temp = tempdir().expect("temp dir");
        let graph = Arc::new(open(&temp.path().join("test.redb")));
        let root = Anchor::new(Box::new(Root));
        graph.put(&root).expect("put");

        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let writer = {
            let graph = Arc::clone(&graph);
            let root = root.clone();
            std::thread::spawn(move || {
                let cell = root.cell().expect("cell");
                let _guard = cell.archetype_mut();
                let _ = locked_tx.send(());
                std::thread::sleep(std::time::Duration::from_millis(100));
                let _ = done_tx.send(graph.put(&Anchor::new(Box::new(GenericEdge))));
            })
        };

        locked_rx.recv().expect("lock taken");
        let (commit_tx, commit_rx) = std::sync::mpsc::channel();
        {
            let graph = Arc::clone(&graph);
            std::thread::spawn(move || {
                let _ = commit_tx.send(graph.commit());
            });
        }
        let timeout = std::time::Duration::from_secs(5);
        assert_eq!(done_rx.recv_timeout(timeout).expect("put finished"), Ok(()));
        assert_eq!(commit_rx.recv_timeout(timeout).expect("commit finished"), Ok(()));
        writer.join().expect("writer");
        assert_eq!(graph.len().expect("len"), 2);
    }
}
