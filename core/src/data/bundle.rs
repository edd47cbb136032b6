//! Bundles and their wire form
//!
//! A bundle is a primary block followed by a block sequence (payload,
//! age, opaque extensions). The octet codec is postcard over the serde
//! derives; the encoded length is the bundle's storage size.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::eid::Eid;

/// Bundle processing priority class.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Priority {
    Bulk,
    #[default]
    Normal,
    Expedited,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Bulk => f.write_str("bulk"),
            Priority::Normal => f.write_str("normal"),
            Priority::Expedited => f.write_str("expedited"),
        }
    }
}

/// Payload fragment description for fragmented bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentInfo {
    /// Offset of this fragment's payload in the original payload.
    pub offset: u64,
    /// Total length of the original application data unit.
    pub total_len: u64,
}

/// Identifies a bundle: source, creation timestamp, creation sequence
/// number and, for fragments, the payload offset.
///
/// The `Display` form is the canonical string used as the storage key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BundleId {
    pub source: Eid,
    pub timestamp: u64,
    pub sequence: u64,
    pub fragment_offset: Option<u64>,
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.source, self.timestamp, self.sequence)?;
        if let Some(offset) = self.fragment_offset {
            write!(f, ".{}", offset)?;
        }
        Ok(())
    }
}

/// The primary block of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryBlock {
    pub source: Eid,
    pub destination: Eid,
    pub report_to: Eid,
    pub custodian: Eid,
    /// Creation timestamp (DTN seconds).
    pub timestamp: u64,
    /// Creation sequence number.
    pub sequence: u64,
    /// Lifetime in seconds from the creation timestamp.
    pub lifetime: u64,
    pub priority: Priority,
    pub custody_requested: bool,
    pub fragment: Option<FragmentInfo>,
}

/// Accumulated in-network age of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AgeBlock {
    pub age_secs: u64,
}

impl AgeBlock {
    pub fn add_seconds(&mut self, secs: u64) {
        self.age_secs = self.age_secs.saturating_add(secs);
    }
}

/// One block of a bundle's block sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    Payload(Vec<u8>),
    Age(AgeBlock),
    /// Blocks this node does not interpret are carried opaquely.
    Extension {
        kind: u8,
        data: Vec<u8>,
    },
}

/// A full bundle: primary block plus block sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub primary: PrimaryBlock,
    pub blocks: Vec<Block>,
}

impl Bundle {
    pub fn id(&self) -> BundleId {
        BundleId {
            source: self.primary.source.clone(),
            timestamp: self.primary.timestamp,
            sequence: self.primary.sequence,
            fragment_offset: self.primary.fragment.map(|f| f.offset),
        }
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.blocks.iter().find_map(|b| match b {
            Block::Payload(data) => Some(data.as_slice()),
            _ => None,
        })
    }

    pub fn age_block_mut(&mut self) -> Option<&mut AgeBlock> {
        self.blocks.iter_mut().find_map(|b| match b {
            Block::Age(age) => Some(age),
            _ => None,
        })
    }

    /// Serialize to the octet stream stored on disk and sent on the wire.
    pub fn encode(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
