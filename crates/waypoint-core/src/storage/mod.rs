//! # Storage Backends
//!
//! Durable [`crate::GraphStore`] implementations.

pub mod redb_graph;

pub use redb_graph::RedbGraph;
