//! # Runtime Primitives
//!
//! Fixed constants for the Waypoint runtime.
//!
//! These values are compiled into the binary and never change at runtime.
//! Anything a deployment may tune lives in [`crate::MachineConfig`] instead.

/// Magic bytes for the durable anchor record header.
///
/// - Record Header = Magic Bytes ("WAYP") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"WAYP";

/// Current anchor record format version.
///
/// Increment this when making breaking changes to [`crate::AnchorRecord`].
pub const FORMAT_VERSION: u8 = 1;

/// Length of the record header in bytes.
pub const HEADER_LEN: usize = 5;

/// Boundary alias that resolves to the session's current root.
pub const ROOT_ALIAS: &str = "root";

/// Default number of worker threads in the walker pool.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Upper bound on the worker pool size accepted from configuration.
pub const MAX_WORKER_THREADS: usize = 256;

/// Default traversal depth for DOT export when the caller gives none.
pub const DEFAULT_DOT_DEPTH: usize = 16;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum size of a single encoded anchor record (16 MB).
///
/// Records larger than this are rejected before any decoding happens.
pub const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Maximum length of an archetype type name.
pub const MAX_TYPE_NAME_LENGTH: usize = 128;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_matches_magic_plus_version() {
        assert_eq!(HEADER_LEN, MAGIC_BYTES.len() + 1);
    }

    #[test]
    fn worker_defaults_are_bounded() {
        assert!(DEFAULT_WORKER_THREADS > 0);
        assert!(DEFAULT_WORKER_THREADS <= MAX_WORKER_THREADS);
    }
}
