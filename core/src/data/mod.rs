//! DTN data model
//!
//! Endpoint identifiers, bundles and their metadata projection, and
//! remote peer records.

mod bundle;
mod eid;
mod meta;
mod node;

pub use bundle::{AgeBlock, Block, Bundle, BundleId, FragmentInfo, PrimaryBlock, Priority};
pub use eid::Eid;
pub use meta::MetaBundle;
pub use node::{ClProtocol, Node, NodeUri, UriState};
