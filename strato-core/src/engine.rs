//! Engine - Trait boundary to the external provisioning engine
//!
//! The builder owns nothing beyond the graph: submission hands the declared
//! nodes and edges to an engine and returns a process handle. The engine's
//! sequencing, retries, and rollback are its own contract; this component
//! never polls or interprets provisioning results.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::graph::{Graph, GraphError};
use crate::resource::ResourceId;

/// Errors crossing the engine boundary
#[derive(Debug, Error)]
pub enum EngineError {
    /// The graph failed the pre-submission structural check
    #[error("malformed graph: {0}")]
    Graph(#[from] GraphError),

    /// The engine has no mapping for a declared resource kind
    #[error("no engine mapping for resource kind \"{0}\"")]
    UnsupportedKind(String),

    /// A configuration payload did not have the shape the engine expects
    #[error("invalid configuration payload for {id}")]
    Serialization {
        id: ResourceId,
        #[source]
        source: serde_json::Error,
    },

    /// A failure reported by the engine while realizing a node
    ///
    /// Surfaced verbatim with the engine's diagnostic attached; never retried
    /// here.
    #[error("provisioning failed for {id}: {message}")]
    Provisioning {
        id: ResourceId,
        message: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl EngineError {
    pub fn provisioning(id: ResourceId, message: impl Into<String>) -> Self {
        Self::Provisioning {
            id,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        if let Self::Provisioning { cause, .. } = &mut self {
            *cause = Some(Box::new(source));
        }
        self
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Process handle returned by a submission
///
/// Request tokens and output values are opaque engine-issued strings.
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Engine request token per node, in submission order
    pub requests: Vec<(ResourceId, String)>,
    /// Declared outputs as opaque handles
    pub outputs: HashMap<String, String>,
}

impl Submission {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            requests: Vec::new(),
            outputs: HashMap::new(),
        }
    }

    pub fn record(&mut self, id: ResourceId, token: impl Into<String>) {
        self.requests.push((id, token.into()));
    }

    pub fn expose(&mut self, name: impl Into<String>, handle: impl Into<String>) {
        self.outputs.insert(name.into(), handle.into());
    }
}

impl Default for Submission {
    fn default() -> Self {
        Self::new()
    }
}

/// External provisioning engine boundary
///
/// Implementations realize a declared graph against live infrastructure.
/// `submit` takes the graph by shared reference: submitting the identical
/// graph twice must not alter the declared node or edge sets.
#[async_trait]
pub trait ProvisioningEngine: Send + Sync {
    /// Engine name (e.g., "cloudcontrol")
    fn name(&self) -> &'static str;

    /// Hand the complete graph to the engine for realization
    async fn submit(&self, graph: &Graph) -> EngineResult<Submission>;

    /// Hand the graph to the engine for teardown, in reverse dependency order
    async fn teardown(&self, graph: &Graph) -> EngineResult<Submission>;
}
