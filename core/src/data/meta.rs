//! Metadata projection of a bundle
//!
//! `MetaBundle` is what the store's indexes hold: cheap to clone and
//! totally ordered for the dispatch queue.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use super::bundle::{Bundle, BundleId, FragmentInfo, Priority};
use super::eid::Eid;

/// Cheap metadata projection of a [`Bundle`].
///
/// Identity is the bundle id. The ordering drives transmission: higher
/// priority first, then earlier expiration, then lower id. `size` is the
/// encoded length, filled in by the store once it is known; it does not
/// take part in identity or ordering.
#[derive(Debug, Clone)]
pub struct MetaBundle {
    pub id: BundleId,
    pub destination: Eid,
    pub priority: Priority,
    pub lifetime: u64,
    /// Absolute expiration timestamp (creation + lifetime, DTN seconds).
    pub expiration: u64,
    pub size: u64,
    pub custody_requested: bool,
    pub fragment: Option<FragmentInfo>,
}

impl MetaBundle {
    pub fn of(bundle: &Bundle) -> Self {
        let primary = &bundle.primary;
        Self {
            id: bundle.id(),
            destination: primary.destination.clone(),
            priority: primary.priority,
            lifetime: primary.lifetime,
            expiration: primary.timestamp.saturating_add(primary.lifetime),
            size: 0,
            custody_requested: primary.custody_requested,
            fragment: primary.fragment,
        }
    }

    /// Canonical string, the storage key (and Bloom filter element).
    pub fn key(&self) -> String {
        self.id.to_string()
    }

    pub fn expired(&self, now: u64) -> bool {
        self.expiration <= now
    }
}

impl PartialEq for MetaBundle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MetaBundle {}

impl Hash for MetaBundle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Ord for MetaBundle {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.expiration.cmp(&other.expiration))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for MetaBundle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::bundle::{Block, PrimaryBlock};

    fn meta(priority: Priority, timestamp: u64, lifetime: u64, sequence: u64) -> MetaBundle {
        let bundle = Bundle {
            primary: PrimaryBlock {
                source: Eid::new("dtn://alpha"),
                destination: Eid::new("dtn://beta"),
                report_to: Eid::none(),
                custodian: Eid::none(),
                timestamp,
                sequence,
                lifetime,
                priority,
                custody_requested: false,
                fragment: None,
            },
            blocks: vec![Block::Payload(vec![0u8; 16])],
        };
        MetaBundle::of(&bundle)
    }

    #[test]
    fn test_expiration_is_timestamp_plus_lifetime() {
        let m = meta(Priority::Normal, 100, 10, 0);
        assert_eq!(m.expiration, 110);
        assert!(!m.expired(109));
        assert!(m.expired(110));
        assert!(m.expired(111));
    }

    #[test]
    fn test_higher_priority_sorts_first() {
        let expedited = meta(Priority::Expedited, 100, 3600, 0);
        let normal = meta(Priority::Normal, 100, 60, 1);
        assert!(expedited < normal);
    }

    #[test]
    fn test_earlier_expiration_breaks_priority_tie() {
        let soon = meta(Priority::Normal, 100, 10, 0);
        let later = meta(Priority::Normal, 100, 20, 1);
        assert!(soon < later);
    }

    #[test]
    fn test_id_breaks_full_tie() {
        let a = meta(Priority::Normal, 100, 10, 0);
        let b = meta(Priority::Normal, 100, 10, 1);
        assert!(a < b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_identity_ignores_size() {
        let mut a = meta(Priority::Normal, 100, 10, 0);
        let b = a.clone();
        a.size = 999;
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), std::cmp::Ordering::Equal);
    }
}
