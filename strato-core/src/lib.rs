//! Strato Core
//!
//! Core library for a deployment tool that declares infrastructure as a
//! dependency graph of typed resource nodes and hands the graph to an
//! external provisioning engine.

pub mod engine;
pub mod graph;
pub mod resource;

pub use engine::{EngineError, ProvisioningEngine, Submission};
pub use graph::{Graph, GraphError, NodeId};
pub use resource::{Resource, ResourceId};
