//! Endpoint identifiers

use std::fmt;

use serde::{Deserialize, Serialize};

/// A DTN endpoint identifier, e.g. `dtn://node/app`.
///
/// Opaque canonical string with equality and prefix semantics. The null
/// endpoint is `dtn:none`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Eid(String);

impl Eid {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// The null endpoint.
    pub fn none() -> Self {
        Self("dtn:none".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == "dtn:none"
    }

    /// Prefix test, used for application endpoints under a node EID.
    pub fn starts_with(&self, prefix: &Eid) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl Default for Eid {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Eid {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
