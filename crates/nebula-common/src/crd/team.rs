//! Team Custom Resource Definition
//!
//! A Team is a cluster-scoped grouping entity. The team reconciler derives
//! tiered ClusterRoles and ClusterRoleBindings from it and marks namespaces
//! carrying the team's label as owned by it. The operator never creates or
//! deletes Teams itself; it only finalizes them and converges their derived
//! RBAC objects.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a Team
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tenant.nebula.dev",
    version = "v1alpha1",
    kind = "Team",
    plural = "teams",
    shortname = "tm",
    printcolumn = r#"{"name":"Manager","type":"string","jsonPath":".spec.manager"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TeamSpec {
    /// Subject (user name) granted admin rights over the team.
    ///
    /// When set, the reconciler appends this user to the team's admin
    /// ClusterRoleBinding. It never removes or replaces existing subjects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<String>,
}
