//! Stack - The Aurora Serverless v2 deployment graph
//!
//! Declares a VPC, an Aurora MySQL cluster mixing one provisioned member with
//! one Serverless v2 member, and an optional auto-scaling group for load
//! testing, as a dependency graph handed to the provisioning engine.
//!
//! The provisioning engine validates a member's instance class against the
//! cluster's current scaling configuration at creation time, which forces the
//! one correctness-critical ordering here: the serverless member must wait
//! for the scaling patch, and the patch must wait for the first member.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use strato_core::graph::{Graph, GraphError};

use crate::kinds;

/// Database port the load-test fleet is granted access to
pub const DB_PORT: u16 = 3306;

/// Engine version shared by the cluster and both members
pub const ENGINE_VERSION: &str = "8.0.mysql_aurora.3.02.0";

/// Enhanced monitoring interval, in seconds
const MONITORING_INTERVAL_SECS: u32 = 10;

/// Managed policies attached to the load-test fleet's instance role
///
/// SSM for shell access without key pairs, Secrets Manager so sysbench can
/// read the cluster credentials.
const FLEET_MANAGED_POLICIES: &[&str] =
    &["AmazonSSMManagedInstanceCore", "SecretsManagerReadWrite"];

/// Bootstrap script for the load-test machines: build sysbench from source
/// and install the mysql client. Opaque configuration data as far as the
/// graph is concerned.
const FLEET_BOOTSTRAP: &[&str] = &[
    "yum update -y",
    "yum install -y jq git make automake libtool pkgconfig libaio-devel",
    "yum install -y mysql-devel openssl-devel",
    "yum install -y postgresql-devel",
    "cd /usr/local/src",
    "git clone https://github.com/akopytov/sysbench.git",
    "cd sysbench/",
    "./autogen.sh",
    "./configure",
    "make -j",
    "make install",
    "rpm --import https://repo.mysql.com/RPM-GPG-KEY-mysql-2022",
    "yum -y install https://dev.mysql.com/get/mysql80-community-release-el7-6.noarch.rpm",
    "yum install mysql -y",
    "sysbench --version",
];

/// Errors building the deployment graph
#[derive(Debug, Error)]
pub enum StackError {
    #[error("invalid deployment graph: {0}")]
    Graph(#[from] GraphError),
    #[error("failed to encode resource configuration: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Serverless v2 capacity bounds, in Aurora capacity units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalingBounds {
    #[serde(rename = "MinCapacity")]
    pub min_capacity: f64,
    #[serde(rename = "MaxCapacity")]
    pub max_capacity: f64,
}

impl Default for ScalingBounds {
    fn default() -> Self {
        Self {
            min_capacity: 0.5,
            max_capacity: 16.0,
        }
    }
}

/// Parameters for one deployment of the stack
///
/// A single spec drives both variants of the deployment: with and without
/// the load-test fleet. The flag gates the fleet and its access grant, and
/// nothing else, so the two variants cannot drift apart.
#[derive(Debug, Clone)]
pub struct DeploymentSpec {
    /// Provisioned members created with the cluster
    pub cluster_instance_count: u32,
    /// Serverless v2 capacity bounds applied by the scaling patch
    pub scaling: ScalingBounds,
    /// Whether to declare the load-test fleet and its access grant
    pub include_load_test_fleet: bool,
    /// Desired size of the load-test fleet
    pub fleet_desired_capacity: u32,
}

impl Default for DeploymentSpec {
    fn default() -> Self {
        Self {
            cluster_instance_count: 1,
            scaling: ScalingBounds::default(),
            include_load_test_fleet: true,
            fleet_desired_capacity: 2,
        }
    }
}

impl DeploymentSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_load_test_fleet(mut self) -> Self {
        self.include_load_test_fleet = false;
        self
    }

    pub fn with_scaling(mut self, scaling: ScalingBounds) -> Self {
        self.scaling = scaling;
        self
    }

    /// Build the deployment graph
    ///
    /// The literal edge set:
    /// 1. network before cluster
    /// 2. cluster's first member before the scaling patch
    /// 3. the scaling patch before the serverless member
    /// 4. network before the load-test fleet
    /// 5. fleet and cluster before the access grant
    pub fn build(&self) -> Result<Graph, StackError> {
        let mut graph = Graph::new();

        let network = graph.declare(
            kinds::VPC,
            "main",
            serde_json::to_value(VpcConfig { max_azs: 2 })?,
        );

        let cluster = graph.declare(
            kinds::DB_CLUSTER,
            "aurora",
            serde_json::to_value(ClusterConfig {
                engine: "aurora-mysql",
                engine_version: ENGINE_VERSION,
                engine_mode: "provisioned",
                instances: self.cluster_instance_count,
                monitoring_interval: MONITORING_INTERVAL_SECS,
            })?,
        );
        graph.add_dependency(cluster, network)?;

        // The first member is provisioned, never serverless: it must exist
        // before the scaling patch has a target to validate against.
        let writer = graph.declare(
            kinds::DB_INSTANCE,
            "writer",
            serde_json::to_value(InstanceConfig {
                db_cluster_identifier: "aurora",
                db_instance_class: None,
                engine: "aurora-mysql",
                engine_version: ENGINE_VERSION,
                monitoring_interval: MONITORING_INTERVAL_SECS,
                enable_performance_insights: false,
            })?,
        );
        graph.add_dependency(writer, cluster)?;

        let patch = graph.declare(
            kinds::SCALING_PATCH,
            "serverless-scaling",
            serde_json::to_value(ScalingPatchConfig {
                db_cluster_identifier: "aurora",
                serverless_v2_scaling_configuration: self.scaling,
            })?,
        );
        graph.add_dependency(patch, cluster)?;
        graph.add_dependency(patch, writer)?;

        let serverless = graph.declare(
            kinds::DB_INSTANCE,
            "serverless",
            serde_json::to_value(InstanceConfig {
                db_cluster_identifier: "aurora",
                db_instance_class: Some("db.serverless"),
                engine: "aurora-mysql",
                engine_version: ENGINE_VERSION,
                monitoring_interval: MONITORING_INTERVAL_SECS,
                enable_performance_insights: true,
            })?,
        );
        graph.add_dependency(serverless, patch)?;

        if self.include_load_test_fleet {
            let fleet = graph.declare(
                kinds::AUTOSCALING_GROUP,
                "loadtest",
                serde_json::to_value(FleetConfig {
                    instance_type: "c6a.large",
                    machine_image: "amazon-linux-2",
                    desired_capacity: self.fleet_desired_capacity,
                    block_device: BlockDevice {
                        device_name: "/dev/xvda",
                        volume_size_gib: 16,
                        volume_type: "gp3",
                    },
                    update_policy: "replacing-update",
                    managed_policies: FLEET_MANAGED_POLICIES.iter().map(|p| p.to_string()).collect(),
                    user_data: FLEET_BOOTSTRAP.iter().map(|c| c.to_string()).collect(),
                })?,
            );
            graph.add_dependency(fleet, network)?;

            let grant = graph.declare(
                kinds::INGRESS_RULE,
                "fleet-to-cluster",
                serde_json::to_value(IngressConfig {
                    ip_protocol: "tcp",
                    from_port: DB_PORT,
                    to_port: DB_PORT,
                    source: "autoscaling.group.loadtest",
                    target: "rds.cluster.aurora",
                })?,
            );
            graph.add_dependency(grant, fleet)?;
            graph.add_dependency(grant, cluster)?;
        }

        // Credentials location for operators, filled in by the engine once
        // the cluster is realized.
        graph.export("rdspass", cluster, "secret_arn")?;

        Ok(graph)
    }
}

#[derive(Debug, Serialize)]
struct VpcConfig {
    #[serde(rename = "MaxAzs")]
    max_azs: u32,
}

#[derive(Debug, Serialize)]
struct ClusterConfig {
    #[serde(rename = "Engine")]
    engine: &'static str,
    #[serde(rename = "EngineVersion")]
    engine_version: &'static str,
    #[serde(rename = "EngineMode")]
    engine_mode: &'static str,
    #[serde(rename = "Instances")]
    instances: u32,
    #[serde(rename = "MonitoringInterval")]
    monitoring_interval: u32,
}

#[derive(Debug, Serialize)]
struct InstanceConfig {
    #[serde(rename = "DBClusterIdentifier")]
    db_cluster_identifier: &'static str,
    /// None defers to the cluster's provisioned default
    #[serde(rename = "DBInstanceClass", skip_serializing_if = "Option::is_none")]
    db_instance_class: Option<&'static str>,
    #[serde(rename = "Engine")]
    engine: &'static str,
    #[serde(rename = "EngineVersion")]
    engine_version: &'static str,
    #[serde(rename = "MonitoringInterval")]
    monitoring_interval: u32,
    #[serde(rename = "EnablePerformanceInsights")]
    enable_performance_insights: bool,
}

#[derive(Debug, Serialize)]
struct ScalingPatchConfig {
    #[serde(rename = "DBClusterIdentifier")]
    db_cluster_identifier: &'static str,
    #[serde(rename = "ServerlessV2ScalingConfiguration")]
    serverless_v2_scaling_configuration: ScalingBounds,
}

#[derive(Debug, Serialize)]
struct BlockDevice {
    #[serde(rename = "DeviceName")]
    device_name: &'static str,
    #[serde(rename = "VolumeSizeGib")]
    volume_size_gib: u32,
    #[serde(rename = "VolumeType")]
    volume_type: &'static str,
}

#[derive(Debug, Serialize)]
struct FleetConfig {
    #[serde(rename = "InstanceType")]
    instance_type: &'static str,
    #[serde(rename = "MachineImage")]
    machine_image: &'static str,
    #[serde(rename = "DesiredCapacity")]
    desired_capacity: u32,
    #[serde(rename = "BlockDevice")]
    block_device: BlockDevice,
    #[serde(rename = "UpdatePolicy")]
    update_policy: &'static str,
    #[serde(rename = "ManagedPolicies")]
    managed_policies: Vec<String>,
    #[serde(rename = "UserData")]
    user_data: Vec<String>,
}

#[derive(Debug, Serialize)]
struct IngressConfig {
    #[serde(rename = "IpProtocol")]
    ip_protocol: &'static str,
    #[serde(rename = "FromPort")]
    from_port: u16,
    #[serde(rename = "ToPort")]
    to_port: u16,
    #[serde(rename = "Source")]
    source: &'static str,
    #[serde(rename = "Target")]
    target: &'static str,
}
