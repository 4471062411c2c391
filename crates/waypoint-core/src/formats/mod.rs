//! # Formats
//!
//! Durable encodings of anchors. File and database I/O live in `storage`.

pub mod persistence;

pub use persistence::{
    AnchorRecord, HydratedRecord, PersistenceHeader, record_from_bytes, record_to_bytes,
};
