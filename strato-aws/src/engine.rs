//! AWS provisioning engine client
//!
//! Implements the `ProvisioningEngine` boundary against the AWS Cloud Control
//! API. Nodes are submitted in topological order; the scaling patch is the
//! one out-of-band node, realized as a direct RDS `ModifyDBCluster` call
//! because it mutates an existing resource instead of creating one.
//!
//! The client performs no retries and no polling: each call yields an
//! engine-issued request token, and any failure is surfaced verbatim with the
//! SDK diagnostic attached.

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_cloudcontrol::Client as CloudControlClient;
use aws_sdk_rds::Client as RdsClient;
use aws_sdk_rds::types::ServerlessV2ScalingConfiguration;
use serde::Deserialize;

use strato_core::engine::{EngineError, EngineResult, ProvisioningEngine, Submission};
use strato_core::graph::Graph;
use strato_core::resource::{Resource, ResourceId};

use crate::kinds;

/// Provisioning engine backed by AWS Cloud Control
pub struct CloudControlEngine {
    cloudcontrol: CloudControlClient,
    rds: RdsClient,
    region: String,
}

impl CloudControlEngine {
    /// Create an engine client for the specified region
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        Self {
            cloudcontrol: CloudControlClient::new(&config),
            rds: RdsClient::new(&config),
            region: region.to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn create_resource(&self, resource: &Resource) -> EngineResult<String> {
        let type_name = type_name_for(&resource.id)?;
        let result = self
            .cloudcontrol
            .create_resource()
            .type_name(type_name)
            .desired_state(resource.config.to_string())
            .send()
            .await
            .map_err(|e| {
                EngineError::provisioning(resource.id.clone(), "engine rejected create")
                    .with_cause(e)
            })?;

        result
            .progress_event()
            .and_then(|p| p.request_token())
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::provisioning(resource.id.clone(), "no request token returned")
            })
    }

    async fn delete_resource(&self, resource: &Resource) -> EngineResult<String> {
        let type_name = type_name_for(&resource.id)?;
        let result = self
            .cloudcontrol
            .delete_resource()
            .type_name(type_name)
            .identifier(&resource.id.name)
            .send()
            .await
            .map_err(|e| {
                EngineError::provisioning(resource.id.clone(), "engine rejected delete")
                    .with_cause(e)
            })?;

        result
            .progress_event()
            .and_then(|p| p.request_token())
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::provisioning(resource.id.clone(), "no request token returned")
            })
    }

    /// Apply the serverless scaling configuration to an existing cluster
    async fn apply_scaling_patch(&self, resource: &Resource) -> EngineResult<String> {
        let params = ScalingPatchParams::from_resource(resource)?;

        self.rds
            .modify_db_cluster()
            .db_cluster_identifier(&params.cluster)
            .serverless_v2_scaling_configuration(
                ServerlessV2ScalingConfiguration::builder()
                    .min_capacity(params.scaling.min_capacity)
                    .max_capacity(params.scaling.max_capacity)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                EngineError::provisioning(resource.id.clone(), "engine rejected scaling patch")
                    .with_cause(e)
            })?;

        // The patch target doubles as the request token, as the patch has no
        // resource of its own.
        Ok(params.cluster)
    }
}

#[async_trait]
impl ProvisioningEngine for CloudControlEngine {
    fn name(&self) -> &'static str {
        "cloudcontrol"
    }

    async fn submit(&self, graph: &Graph) -> EngineResult<Submission> {
        graph.validate()?;

        let mut submission = Submission::new();
        for node in graph.topological_order() {
            let Some(resource) = graph.resource(node) else {
                continue;
            };
            let token = if kinds::is_out_of_band(&resource.id.kind) {
                self.apply_scaling_patch(resource).await?
            } else {
                self.create_resource(resource).await?
            };
            submission.record(resource.id.clone(), token);
        }

        for output in graph.outputs() {
            let Some(resource) = graph.resource(output.node) else {
                continue;
            };
            submission.expose(
                &output.name,
                format!("{}#{}", resource.id, output.attribute),
            );
        }

        Ok(submission)
    }

    async fn teardown(&self, graph: &Graph) -> EngineResult<Submission> {
        graph.validate()?;

        let mut submission = Submission::new();
        for node in graph.topological_order().into_iter().rev() {
            let Some(resource) = graph.resource(node) else {
                continue;
            };
            // The out-of-band patch leaves nothing behind to delete.
            if kinds::is_out_of_band(&resource.id.kind) {
                continue;
            }
            let token = self.delete_resource(resource).await?;
            submission.record(resource.id.clone(), token);
        }

        Ok(submission)
    }
}

/// CloudFormation type name for a declared node
fn type_name_for(id: &ResourceId) -> EngineResult<&'static str> {
    kinds::cloudformation_type(&id.kind).ok_or_else(|| EngineError::UnsupportedKind(id.kind.clone()))
}

#[derive(Debug, Deserialize)]
struct ScalingPatchPayload {
    #[serde(rename = "DBClusterIdentifier")]
    db_cluster_identifier: String,
    #[serde(rename = "ServerlessV2ScalingConfiguration")]
    serverless_v2_scaling_configuration: ScalingPayload,
}

#[derive(Debug, Deserialize)]
struct ScalingPayload {
    #[serde(rename = "MinCapacity")]
    min_capacity: f64,
    #[serde(rename = "MaxCapacity")]
    max_capacity: f64,
}

/// Decoded scaling-patch parameters
#[derive(Debug)]
struct ScalingPatchParams {
    cluster: String,
    scaling: ScalingPayload,
}

impl ScalingPatchParams {
    fn from_resource(resource: &Resource) -> EngineResult<Self> {
        let payload: ScalingPatchPayload = serde_json::from_value(resource.config.clone())
            .map_err(|source| EngineError::Serialization {
                id: resource.id.clone(),
                source,
            })?;
        Ok(Self {
            cluster: payload.db_cluster_identifier,
            scaling: payload.serverless_v2_scaling_configuration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    use crate::stack::DeploymentSpec;

    /// Engine that routes nodes like the real client but records instead of
    /// calling AWS
    struct RoutingEngine {
        created: Mutex<Vec<String>>,
        patched: Mutex<Vec<String>>,
    }

    impl RoutingEngine {
        fn new() -> Self {
            Self {
                created: Mutex::new(Vec::new()),
                patched: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProvisioningEngine for RoutingEngine {
        fn name(&self) -> &'static str {
            "routing"
        }

        async fn submit(&self, graph: &Graph) -> EngineResult<Submission> {
            graph.validate()?;
            let mut submission = Submission::new();
            for node in graph.topological_order() {
                let Some(resource) = graph.resource(node) else {
                    continue;
                };
                if kinds::is_out_of_band(&resource.id.kind) {
                    let params = ScalingPatchParams::from_resource(resource)?;
                    self.patched.lock().unwrap().push(params.cluster.clone());
                    submission.record(resource.id.clone(), params.cluster);
                } else {
                    let type_name = type_name_for(&resource.id)?;
                    self.created.lock().unwrap().push(type_name.to_string());
                    submission.record(resource.id.clone(), type_name);
                }
            }
            Ok(submission)
        }

        async fn teardown(&self, graph: &Graph) -> EngineResult<Submission> {
            graph.validate()?;
            Ok(Submission::new())
        }
    }

    #[tokio::test]
    async fn submission_routes_every_deployment_node() {
        let graph = DeploymentSpec::new().build().unwrap();
        let engine = RoutingEngine::new();

        let submission = engine.submit(&graph).await.unwrap();

        assert_eq!(submission.requests.len(), 7);
        // The scaling patch is the one out-of-band call, aimed at the cluster.
        assert_eq!(engine.patched.lock().unwrap().as_slice(), ["aurora"]);
        let created = engine.created.lock().unwrap();
        assert_eq!(created.len(), 6);
        assert!(created.contains(&"AWS::RDS::DBCluster".to_string()));
        assert!(created.contains(&"AWS::AutoScaling::AutoScalingGroup".to_string()));

        // Submission order honors the patch ordering.
        let order: Vec<String> = submission
            .requests
            .iter()
            .map(|(id, _)| id.to_string())
            .collect();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("rds.instance.writer") < pos("rds.scaling_patch.serverless-scaling"));
        assert!(pos("rds.scaling_patch.serverless-scaling") < pos("rds.instance.serverless"));
    }

    #[tokio::test]
    async fn malformed_patch_payload_fails_the_submission() {
        let mut graph = Graph::new();
        graph.declare(kinds::SCALING_PATCH, "scaling", json!({"MinCapacity": 0.5}));

        let err = RoutingEngine::new().submit(&graph).await.unwrap_err();
        assert!(matches!(err, EngineError::Serialization { .. }));
        assert!(
            err.to_string()
                .starts_with("invalid configuration payload for")
        );
    }

    #[test]
    fn scaling_patch_payload_decodes() {
        let resource = Resource::new(
            kinds::SCALING_PATCH,
            "serverless-scaling",
            json!({
                "DBClusterIdentifier": "aurora",
                "ServerlessV2ScalingConfiguration": {
                    "MinCapacity": 0.5,
                    "MaxCapacity": 16.0,
                }
            }),
        );

        let params = ScalingPatchParams::from_resource(&resource).unwrap();
        assert_eq!(params.cluster, "aurora");
        assert_eq!(params.scaling.min_capacity, 0.5);
        assert_eq!(params.scaling.max_capacity, 16.0);
    }

    #[test]
    fn malformed_scaling_patch_payload_is_an_error() {
        let resource = Resource::new(
            kinds::SCALING_PATCH,
            "serverless-scaling",
            json!({"MinCapacity": 0.5}),
        );

        let err = ScalingPatchParams::from_resource(&resource).unwrap_err();
        assert!(matches!(err, EngineError::Serialization { .. }));
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let id = ResourceId::new("s3.bucket", "state");
        let err = type_name_for(&id).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedKind(kind) if kind == "s3.bucket"));
    }

    #[test]
    fn cluster_maps_to_cloudformation() {
        let id = ResourceId::new(kinds::DB_CLUSTER, "aurora");
        assert_eq!(type_name_for(&id).unwrap(), "AWS::RDS::DBCluster");
    }
}
