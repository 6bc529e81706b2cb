//! RBAC template generation
//!
//! Pure, deterministic constructors for the desired-state RBAC objects the
//! reconcilers converge against. Templates are recomputed on every reconcile
//! from the identity of their owning object and never persisted themselves;
//! only their live counterparts are.

use std::collections::BTreeMap;

use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::{
    CREATOR_ANNOTATION_KEY, DESCRIPTION_ANNOTATION_KEY, DISPLAY_NAME_ANNOTATION_KEY,
    RBAC_API_GROUP, RESOURCE_LABEL_KEY, RESOURCE_ROLE, SYSTEM_CREATOR, TEAM_LABEL_KEY,
};

const TEAM_ADMIN_DESCRIPTION: &str =
    "Allows admin access to perform any action on any resource, it gives full control over every resource in the team.";
const TEAM_REGULAR_DESCRIPTION: &str = "Normal user in the team, can create namespaces.";
const TEAM_VIEWER_DESCRIPTION: &str = "Allows viewer access to view all resources in the team.";

const NAMESPACE_ADMIN_DESCRIPTION: &str =
    "Full control over every resource in the namespace, including role management.";
const NAMESPACE_DEVELOPER_DESCRIPTION: &str =
    "Full control over workload resources in the namespace, read-only access elsewhere.";
const NAMESPACE_VIEWER_DESCRIPTION: &str =
    "Read-only access to every resource in the namespace.";

/// API groups a namespace developer has full control over
const DEVELOPER_API_GROUPS: &[&str] = &[
    "",
    "apps",
    "extensions",
    "batch",
    "autoscaling",
    "app.k8s.io",
    "monitoring.coreos.com",
    "networking.k8s.io",
];

/// Permission tier of a team-scoped role or binding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeamTier {
    /// Full control over the team and its sub-resources
    Admin,
    /// Read access plus namespace-creation rights within the team
    Regular,
    /// Read-only access to the team
    Viewer,
}

impl TeamTier {
    /// All tiers in canonical processing order.
    ///
    /// The tiers are independent; the fixed order exists for deterministic
    /// log and test output.
    pub const ALL: [TeamTier; 3] = [TeamTier::Admin, TeamTier::Regular, TeamTier::Viewer];

    /// Tier name as it appears in the qualified resource name
    pub fn as_str(self) -> &'static str {
        match self {
            TeamTier::Admin => "admin",
            TeamTier::Regular => "regular",
            TeamTier::Viewer => "viewer",
        }
    }

    fn display_name(self) -> &'static str {
        match self {
            TeamTier::Admin => "team-admin",
            TeamTier::Regular => "team-regular",
            TeamTier::Viewer => "team-viewer",
        }
    }

    fn description(self) -> &'static str {
        match self {
            TeamTier::Admin => TEAM_ADMIN_DESCRIPTION,
            TeamTier::Regular => TEAM_REGULAR_DESCRIPTION,
            TeamTier::Viewer => TEAM_VIEWER_DESCRIPTION,
        }
    }

    fn rules(self, team: &str) -> Vec<PolicyRule> {
        match self {
            TeamTier::Admin => vec![PolicyRule {
                verbs: strings(&["*"]),
                api_groups: Some(strings(&["*"])),
                resources: Some(strings(&["teams", "teams/*"])),
                resource_names: Some(vec![team.to_string()]),
                ..Default::default()
            }],
            TeamTier::Regular => vec![
                PolicyRule {
                    verbs: strings(&["get"]),
                    api_groups: Some(strings(&["*"])),
                    resources: Some(strings(&["teams"])),
                    resource_names: Some(vec![team.to_string()]),
                    ..Default::default()
                },
                PolicyRule {
                    verbs: strings(&["create"]),
                    api_groups: Some(strings(&["tenant.nebula.dev"])),
                    resources: Some(strings(&["teams/namespaces"])),
                    resource_names: Some(vec![team.to_string()]),
                    ..Default::default()
                },
            ],
            TeamTier::Viewer => vec![PolicyRule {
                verbs: strings(&["get", "list"]),
                api_groups: Some(strings(&["*"])),
                resources: Some(strings(&["teams", "teams/*"])),
                resource_names: Some(vec![team.to_string()]),
                ..Default::default()
            }],
        }
    }
}

impl std::fmt::Display for TeamTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualified name shared by a tier's ClusterRole and ClusterRoleBinding
pub fn team_resource_name(team: &str, tier: TeamTier) -> String {
    format!("team:{}:{}", team, tier.as_str())
}

/// Desired ClusterRole for one tier of a team
pub fn team_cluster_role(team: &str, tier: TeamTier) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(team_resource_name(team, tier)),
            labels: Some(BTreeMap::from([(
                TEAM_LABEL_KEY.to_string(),
                team.to_string(),
            )])),
            annotations: Some(BTreeMap::from([
                (
                    DISPLAY_NAME_ANNOTATION_KEY.to_string(),
                    tier.display_name().to_string(),
                ),
                (
                    DESCRIPTION_ANNOTATION_KEY.to_string(),
                    tier.description().to_string(),
                ),
                (CREATOR_ANNOTATION_KEY.to_string(), SYSTEM_CREATOR.to_string()),
            ])),
            ..Default::default()
        },
        rules: Some(tier.rules(team)),
        ..Default::default()
    }
}

/// Desired ClusterRoleBinding for one tier of a team.
///
/// The subject list is empty; the reconciler seeds or appends the manager
/// subject itself so that it never perturbs subjects added out of band.
pub fn team_cluster_role_binding(team: &str, tier: TeamTier) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(team_resource_name(team, tier)),
            labels: Some(BTreeMap::from([(
                TEAM_LABEL_KEY.to_string(),
                team.to_string(),
            )])),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: team_resource_name(team, tier),
        },
        subjects: None,
    }
}

/// Subject identifying a user granted rights through a team binding
pub fn user_subject(name: &str) -> Subject {
    Subject {
        api_group: Some(RBAC_API_GROUP.to_string()),
        kind: "User".to_string(),
        name: name.to_string(),
        namespace: None,
    }
}

/// Names of the default namespace-scoped roles, in processing order
pub const NAMESPACE_ROLE_NAMES: [&str; 3] = ["admin", "developer", "viewer"];

/// The three default roles ensured in every team-controlled namespace.
///
/// Only the rule sets are authoritative for convergence; labels and
/// annotations on live roles are left alone once created.
pub fn namespace_default_roles() -> Vec<Role> {
    vec![
        namespace_role(
            "admin",
            "Namespace admin role",
            NAMESPACE_ADMIN_DESCRIPTION,
            vec![PolicyRule {
                verbs: strings(&["*"]),
                api_groups: Some(strings(&["*"])),
                resources: Some(strings(&["*"])),
                ..Default::default()
            }],
        ),
        namespace_role(
            "developer",
            "Namespace developer role",
            NAMESPACE_DEVELOPER_DESCRIPTION,
            vec![
                PolicyRule {
                    verbs: strings(&["get", "list", "watch"]),
                    api_groups: Some(strings(&["*"])),
                    resources: Some(strings(&["*"])),
                    ..Default::default()
                },
                PolicyRule {
                    verbs: strings(&["*"]),
                    api_groups: Some(strings(DEVELOPER_API_GROUPS)),
                    resources: Some(strings(&["*"])),
                    ..Default::default()
                },
            ],
        ),
        namespace_role(
            "viewer",
            "Namespace viewer role",
            NAMESPACE_VIEWER_DESCRIPTION,
            vec![PolicyRule {
                verbs: strings(&["get", "list", "watch"]),
                api_groups: Some(strings(&["*"])),
                resources: Some(strings(&["*"])),
                ..Default::default()
            }],
        ),
    ]
}

fn namespace_role(name: &str, display_name: &str, description: &str, rules: Vec<PolicyRule>) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                RESOURCE_LABEL_KEY.to_string(),
                RESOURCE_ROLE.to_string(),
            )])),
            annotations: Some(BTreeMap::from([
                (
                    DISPLAY_NAME_ANNOTATION_KEY.to_string(),
                    display_name.to_string(),
                ),
                (
                    DESCRIPTION_ANNOTATION_KEY.to_string(),
                    description.to_string(),
                ),
                (CREATOR_ANNOTATION_KEY.to_string(), SYSTEM_CREATOR.to_string()),
            ])),
            ..Default::default()
        },
        rules: Some(rules),
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}
