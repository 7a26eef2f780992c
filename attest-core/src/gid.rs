//! Global identifiers.
//!
//! Every persisted row is keyed by a [`Gid`], which packs the owning tenant,
//! the entity type and a time-ordered random component into 24 bytes:
//!
//! - Bytes 0-7: tenant id
//! - Bytes 8-9: entity type tag (big-endian)
//! - Bytes 10-23: first 14 bytes of a UUIDv7 (48-bit millisecond timestamp
//!   followed by random bits)
//!
//! Keys of one tenant and one entity type therefore sort by creation time.
//! The external form is unpadded URL-safe base64.

use crate::enums::EntityType;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Size of an encoded GID in bytes.
pub const GID_LEN: usize = 24;

/// Size of a tenant identifier in bytes.
pub const TENANT_ID_LEN: usize = 8;

/// Errors raised while decoding identifiers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GidError {
    #[error("invalid identifier encoding: {0}")]
    Encoding(String),

    #[error("invalid identifier length: expected {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },

    #[error("unknown entity type tag {0}")]
    UnknownEntityType(u16),

    #[error("expected a {expected} identifier, got a {got} identifier")]
    EntityTypeMismatch {
        expected: EntityType,
        got: EntityType,
    },
}

// ============================================================================
// TENANT ID
// ============================================================================

/// Identifier of a tenant. One organization owns exactly one tenant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId([u8; TENANT_ID_LEN]);

impl TenantId {
    /// Mint a fresh random tenant id.
    pub fn generate() -> Self {
        let (hi, lo) = Uuid::new_v4().as_u64_pair();
        Self((hi ^ lo).to_be_bytes())
    }

    pub const fn from_bytes(bytes: [u8; TENANT_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, GidError> {
        let array: [u8; TENANT_ID_LEN] = bytes.try_into().map_err(|_| GidError::Length {
            expected: TENANT_ID_LEN,
            got: bytes.len(),
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; TENANT_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self)
    }
}

impl FromStr for TenantId {
    type Err = GidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| GidError::Encoding(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for TenantId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

// ============================================================================
// GID
// ============================================================================

/// Global identifier carrying tenant and entity type.
///
/// Equality and ordering are bytewise, which matches how PostgreSQL orders
/// the BYTEA columns the ids are stored in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gid([u8; GID_LEN]);

impl Gid {
    /// Mint a new identifier for `entity_type` owned by `tenant_id`.
    ///
    /// The random component comes from UUIDv7 generation; an exhausted
    /// entropy source aborts the process there.
    pub fn new(tenant_id: TenantId, entity_type: EntityType) -> Self {
        let uuid = Uuid::now_v7();
        let mut bytes = [0u8; GID_LEN];
        bytes[0..8].copy_from_slice(tenant_id.as_bytes());
        bytes[8..10].copy_from_slice(&entity_type.tag().to_be_bytes());
        bytes[10..24].copy_from_slice(&uuid.as_bytes()[0..14]);
        Self(bytes)
    }

    /// Rebuild an identifier from its raw bytes, validating the type tag.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, GidError> {
        let array: [u8; GID_LEN] = bytes.try_into().map_err(|_| GidError::Length {
            expected: GID_LEN,
            got: bytes.len(),
        })?;
        let tag = u16::from_be_bytes([array[8], array[9]]);
        EntityType::from_tag(tag).ok_or(GidError::UnknownEntityType(tag))?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; GID_LEN] {
        &self.0
    }

    pub fn tenant_id(&self) -> TenantId {
        let mut tenant = [0u8; TENANT_ID_LEN];
        tenant.copy_from_slice(&self.0[0..8]);
        TenantId(tenant)
    }

    pub fn entity_type(&self) -> EntityType {
        let tag = u16::from_be_bytes([self.0[8], self.0[9]]);
        // Tags are validated by every constructor.
        EntityType::from_tag(tag).unwrap_or(EntityType::Organization)
    }

    /// Check that this id references an entity of the `expected` type.
    pub fn ensure_type(&self, expected: EntityType) -> Result<(), GidError> {
        let got = self.entity_type();
        if got != expected {
            return Err(GidError::EntityTypeMismatch { expected, got });
        }
        Ok(())
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gid({}:{})", self.entity_type(), self)
    }
}

impl FromStr for Gid {
    type Err = GidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| GidError::Encoding(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for Gid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Gid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
