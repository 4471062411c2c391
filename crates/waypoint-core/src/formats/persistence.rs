//! # Persistence Format
//!
//! Binary serialization for single anchors.
//!
//! Format: Header (5 bytes) + postcard-serialized [`AnchorRecord`].
//! - 4 bytes: Magic ("WAYP")
//! - 1 byte: Version
//!
//! A hydrated record carries the archetype's field map as a JSON string,
//! since postcard is not self-describing and archetype types are only known
//! to the registry. Relations are stored as ids, so every related anchor
//! comes back as a stub and hydrates through the store on first use.
//!
//! Size and header are validated before the payload is decoded.

use crate::anchor::Spatial;
use crate::primitives;
use crate::types::{AnchorId, ArchetypeKind, Permission, WaypointError};
use serde::{Deserialize, Serialize};

// =============================================================================
// RECORDS
// =============================================================================

/// Serialized form of an anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnchorRecord {
    /// Only the identity of an anchor.
    Stub { id: AnchorId, kind: ArchetypeKind },
    /// A full anchor.
    Hydrated(HydratedRecord),
}

impl AnchorRecord {
    /// Id of the recorded anchor.
    #[must_use]
    pub fn id(&self) -> AnchorId {
        match self {
            Self::Stub { id, .. } => *id,
            Self::Hydrated(record) => record.id,
        }
    }
}

/// Everything needed to rebuild a hydrated anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydratedRecord {
    pub id: AnchorId,
    pub kind: ArchetypeKind,
    pub type_name: String,
    pub root: Option<AnchorId>,
    pub access: Permission,
    pub persistent: bool,
    pub spatial: Spatial,
    /// JSON object with the archetype's fields.
    pub fields: String,
}

// =============================================================================
// RECORD HEADER
// =============================================================================

/// The persistence header precedes every record.
#[derive(Debug, Clone, Copy)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    /// Create a new header with current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    /// Validate the header.
    pub fn validate(&self) -> Result<(), WaypointError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(WaypointError::DeserializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(WaypointError::DeserializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    /// Write header to bytes.
    pub fn to_bytes(&self) -> [u8; primitives::HEADER_LEN] {
        let mut bytes = [0u8; primitives::HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    /// Read header from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WaypointError> {
        if bytes.len() < primitives::HEADER_LEN {
            return Err(WaypointError::DeserializationError(
                "Header too short".to_string(),
            ));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a record to bytes (header + payload).
pub fn record_to_bytes(record: &AnchorRecord) -> Result<Vec<u8>, WaypointError> {
    let payload = postcard::to_stdvec(record)
        .map_err(|e| WaypointError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(primitives::HEADER_LEN + payload.len());
    result.extend_from_slice(&PersistenceHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a record from bytes.
pub fn record_from_bytes(bytes: &[u8]) -> Result<AnchorRecord, WaypointError> {
    if bytes.len() > primitives::MAX_RECORD_SIZE {
        return Err(WaypointError::DeserializationError(format!(
            "Record size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            primitives::MAX_RECORD_SIZE
        )));
    }

    let header = PersistenceHeader::from_bytes(bytes)?;
    header.validate()?;

    postcard::from_bytes(&bytes[primitives::HEADER_LEN..]).map_err(|e| {
        WaypointError::DeserializationError(format!("Failed to decode anchor record: {}", e))
    })
}

// =============================================================================
// TESTS
// =============================================================================
