//! Strato AWS
//!
//! The AWS side of the strato deployment tool: the Aurora Serverless v2
//! deployment graph, the mapping from logical resource kinds to
//! CloudFormation type names, and a provisioning engine client backed by the
//! AWS Cloud Control API.

pub mod engine;
pub mod kinds;
pub mod stack;

pub use engine::CloudControlEngine;
pub use stack::{DeploymentSpec, StackError};
