//! Resource kind definitions for the AWS engine
//!
//! This module defines:
//! - The logical resource kinds the deployment graph declares
//! - The mapping between logical kinds and AWS CloudFormation type names

/// Isolated virtual network
pub const VPC: &str = "ec2.vpc";
/// Managed database cluster
pub const DB_CLUSTER: &str = "rds.cluster";
/// Database cluster member
pub const DB_INSTANCE: &str = "rds.instance";
/// Out-of-band scaling-configuration patch applied to an existing cluster
pub const SCALING_PATCH: &str = "rds.scaling_patch";
/// Pool of load-generating machines
pub const AUTOSCALING_GROUP: &str = "autoscaling.group";
/// Permission for one resource to reach another on a fixed port
pub const INGRESS_RULE: &str = "ec2.ingress_rule";

/// All kinds the engine understands
pub fn all() -> Vec<&'static str> {
    vec![
        VPC,
        DB_CLUSTER,
        DB_INSTANCE,
        SCALING_PATCH,
        AUTOSCALING_GROUP,
        INGRESS_RULE,
    ]
}

/// CloudFormation type name for a logical kind
///
/// Returns `None` for unknown kinds and for the scaling patch, which is not a
/// CloudFormation resource: the engine realizes it as a direct RDS API call.
pub fn cloudformation_type(kind: &str) -> Option<&'static str> {
    match kind {
        VPC => Some("AWS::EC2::VPC"),
        DB_CLUSTER => Some("AWS::RDS::DBCluster"),
        DB_INSTANCE => Some("AWS::RDS::DBInstance"),
        AUTOSCALING_GROUP => Some("AWS::AutoScaling::AutoScalingGroup"),
        INGRESS_RULE => Some("AWS::EC2::SecurityGroupIngress"),
        _ => None,
    }
}

/// Whether a kind is realized outside CloudFormation, as a direct API call
pub fn is_out_of_band(kind: &str) -> bool {
    kind == SCALING_PATCH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_is_mapped_or_out_of_band() {
        for kind in all() {
            assert!(
                cloudformation_type(kind).is_some() || is_out_of_band(kind),
                "kind {kind} has no engine mapping"
            );
        }
    }

    #[test]
    fn unknown_kind_has_no_mapping() {
        assert_eq!(cloudformation_type("s3.bucket"), None);
        assert!(!is_out_of_band("s3.bucket"));
    }

    #[test]
    fn scaling_patch_is_not_a_cloudformation_resource() {
        assert_eq!(cloudformation_type(SCALING_PATCH), None);
        assert!(is_out_of_band(SCALING_PATCH));
    }
}
