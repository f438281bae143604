//! Resource - Declared resource nodes and their identifiers

use serde::{Deserialize, Serialize};

/// Unique logical identifier for a declared resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    /// Resource kind (e.g., "rds.cluster", "ec2.vpc")
    pub kind: String,
    /// Logical name of this declaration (e.g., "aurora", "main")
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

/// A declared resource node
///
/// The configuration payload is opaque to the graph builder: it is carried
/// through to the provisioning engine without local validation. Any rejection
/// of the payload contents is surfaced by the engine, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub config: serde_json::Value,
}

impl Resource {
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            id: ResourceId::new(kind, name),
            config,
        }
    }
}
