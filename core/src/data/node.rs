//! Remote peer records
//!
//! A `Node` is the authoritative record for one neighbor: its EID plus
//! the set of transport URIs it was observed under. URIs merge
//! additively from discovery and connection events and expire
//! individually; the node itself expires once its URI set is empty.

use std::fmt;

use super::eid::Eid;

/// Convergence-layer protocol tag, matched against transport plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClProtocol {
    Undefined,
    Tcp,
    Udp,
    Http,
    File,
}

impl fmt::Display for ClProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClProtocol::Undefined => f.write_str("undefined"),
            ClProtocol::Tcp => f.write_str("tcp"),
            ClProtocol::Udp => f.write_str("udp"),
            ClProtocol::Http => f.write_str("http"),
            ClProtocol::File => f.write_str("file"),
        }
    }
}

/// How a URI entered the node record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UriState {
    Discovered,
    Connected,
    Available,
    Static,
}

/// One observed way to reach a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeUri {
    pub protocol: ClProtocol,
    pub address: String,
    pub priority: u8,
    /// Expiry timestamp (DTN seconds); 0 means the entry never expires.
    pub expires: u64,
    pub state: UriState,
}

impl NodeUri {
    pub fn new(protocol: ClProtocol, address: impl Into<String>, state: UriState) -> Self {
        Self {
            protocol,
            address: address.into(),
            priority: 0,
            expires: 0,
            state,
        }
    }

    pub fn with_expires(mut self, expires: u64) -> Self {
        self.expires = expires;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    fn live(&self, now: u64) -> bool {
        self.expires == 0 || self.expires > now
    }
}

/// The authoritative record for one remote peer.
///
/// Equality is by EID.
#[derive(Debug, Clone)]
pub struct Node {
    eid: Eid,
    uris: Vec<NodeUri>,
    announced: bool,
    connect_immediately: bool,
}

impl Node {
    pub fn new(eid: Eid) -> Self {
        Self {
            eid,
            uris: Vec::new(),
            announced: false,
            connect_immediately: false,
        }
    }

    pub fn with_uri(mut self, uri: NodeUri) -> Self {
        self.add_uri(uri);
        self
    }

    pub fn with_immediate_connect(mut self) -> Self {
        self.connect_immediately = true;
        self
    }

    pub fn eid(&self) -> &Eid {
        &self.eid
    }

    pub fn uris(&self) -> &[NodeUri] {
        &self.uris
    }

    /// True iff the most recent event published for this node was
    /// NODE_AVAILABLE.
    pub fn is_announced(&self) -> bool {
        self.announced
    }

    pub fn set_announced(&mut self, announced: bool) {
        self.announced = announced;
    }

    /// Hint from the source of the observation to connect right away.
    pub fn connect_immediately(&self) -> bool {
        self.connect_immediately
    }

    fn add_uri(&mut self, uri: NodeUri) {
        match self
            .uris
            .iter_mut()
            .find(|u| u.protocol == uri.protocol && u.address == uri.address)
        {
            Some(existing) => *existing = uri,
            None => self.uris.push(uri),
        }
    }

    /// Additive merge: union of URIs keyed by (protocol, address); the
    /// other side wins on collision.
    pub fn merge(&mut self, other: &Node) {
        for uri in &other.uris {
            self.add_uri(uri.clone());
        }
        if other.connect_immediately {
            self.connect_immediately = true;
        }
    }

    /// Subtractive merge: drop the listed URIs.
    pub fn remove(&mut self, other: &Node) {
        self.uris
            .retain(|u| {
                !other
                    .uris
                    .iter()
                    .any(|o| o.protocol == u.protocol && o.address == u.address)
            });
    }

    /// Drop URIs whose expiry has passed. Returns true once the node
    /// itself is expired (no URIs left).
    pub fn expire(&mut self, now: u64) -> bool {
        self.uris.retain(|u| u.live(now));
        self.uris.is_empty()
    }

    /// At least one non-expired URI.
    pub fn is_available(&self, now: u64) -> bool {
        self.uris.iter().any(|u| u.live(now))
    }

    /// Whether any live URI advertises the given protocol.
    pub fn has(&self, protocol: ClProtocol, now: u64) -> bool {
        self.uris
            .iter()
            .any(|u| u.protocol == protocol && u.live(now))
    }

    /// Live URIs in a given state on a given protocol.
    pub fn get(&self, state: UriState, protocol: ClProtocol) -> Vec<&NodeUri> {
        self.uris
            .iter()
            .filter(|u| u.state == state && u.protocol == protocol)
            .collect()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.eid == other.eid
    }
}

impl Eq for Node {}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} uris)", self.eid, self.uris.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(eid: &str) -> Node {
        Node::new(Eid::new(eid))
    }

    #[test]
    fn test_merge_unions_by_protocol_and_address() {
        let mut a = node("dtn://peer")
            .with_uri(NodeUri::new(ClProtocol::Tcp, "10.0.0.1:4556", UriState::Discovered));
        let b = node("dtn://peer")
            .with_uri(NodeUri::new(ClProtocol::Tcp, "10.0.0.1:4556", UriState::Connected))
            .with_uri(NodeUri::new(ClProtocol::Udp, "10.0.0.1:4556", UriState::Discovered));

        a.merge(&b);
        assert_eq!(a.uris().len(), 2);
        // Collision resolved in favor of the merged-in entry.
        assert_eq!(a.get(UriState::Connected, ClProtocol::Tcp).len(), 1);
    }

    #[test]
    fn test_remove_subtracts_listed_uris() {
        let mut a = node("dtn://peer")
            .with_uri(NodeUri::new(ClProtocol::Tcp, "10.0.0.1:4556", UriState::Connected))
            .with_uri(NodeUri::new(ClProtocol::Udp, "10.0.0.1:4556", UriState::Discovered));
        let gone = node("dtn://peer")
            .with_uri(NodeUri::new(ClProtocol::Tcp, "10.0.0.1:4556", UriState::Connected));

        a.remove(&gone);
        assert_eq!(a.uris().len(), 1);
        assert!(a.has(ClProtocol::Udp, 0));
        assert!(!a.has(ClProtocol::Tcp, 0));
    }

    #[test]
    fn test_expire_drops_stale_uris() {
        let mut n = node("dtn://peer")
            .with_uri(NodeUri::new(ClProtocol::Tcp, "a", UriState::Discovered).with_expires(100))
            .with_uri(NodeUri::new(ClProtocol::Udp, "b", UriState::Discovered).with_expires(200));

        assert!(!n.expire(150));
        assert_eq!(n.uris().len(), 1);
        assert!(n.expire(250));
        assert!(n.uris().is_empty());
    }

    #[test]
    fn test_availability_follows_uri_expiry() {
        let n = node("dtn://peer")
            .with_uri(NodeUri::new(ClProtocol::Tcp, "a", UriState::Discovered).with_expires(100));
        assert!(n.is_available(99));
        assert!(!n.is_available(100));
    }

    #[test]
    fn test_static_uri_never_expires() {
        let mut n = node("dtn://relay")
            .with_uri(NodeUri::new(ClProtocol::Tcp, "relay:4556", UriState::Static));
        assert!(!n.expire(u64::MAX - 1));
        assert!(n.is_available(u64::MAX - 1));
    }

    #[test]
    fn test_equality_is_by_eid() {
        let a = node("dtn://peer").with_uri(NodeUri::new(ClProtocol::Tcp, "a", UriState::Connected));
        let b = node("dtn://peer");
        assert_eq!(a, b);
    }

    #[test]
    fn test_merge_carries_connect_hint() {
        let mut a = node("dtn://peer");
        let b = node("dtn://peer").with_immediate_connect();
        a.merge(&b);
        assert!(a.connect_immediately());
    }
}
