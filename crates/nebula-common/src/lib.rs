//! Common types for Nebula: the Team CRD, RBAC templates, errors, and the
//! string constants that form the wire contract with the cluster API.

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod rbac;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label key binding a namespace (or a generated RBAC object) to a team.
///
/// On namespaces the value is the base64url encoding (no padding) of the
/// team annotation; see [`team_label_value`].
pub const TEAM_LABEL_KEY: &str = "team";

/// Annotation key carrying the plain team name on a namespace
pub const TEAM_ANNOTATION_KEY: &str = "team";

/// Annotation key for a human-readable display name on generated objects
pub const DISPLAY_NAME_ANNOTATION_KEY: &str = "display-name";

/// Annotation key for a human-readable description on generated objects
pub const DESCRIPTION_ANNOTATION_KEY: &str = "description";

/// Annotation key recording who created a generated object
pub const CREATOR_ANNOTATION_KEY: &str = "creator";

/// Creator sentinel for objects the operator creates itself
pub const SYSTEM_CREATOR: &str = "system";

/// Label key marking the kind of generated RBAC object
pub const RESOURCE_LABEL_KEY: &str = "resource";

/// [`RESOURCE_LABEL_KEY`] value for namespace-scoped Roles
pub const RESOURCE_ROLE: &str = "role";

/// [`RESOURCE_LABEL_KEY`] value for ClusterRoles
pub const RESOURCE_CLUSTER_ROLE: &str = "clusterrole";

/// Finalizer token gating namespace cleanup
pub const NAMESPACE_FINALIZER: &str = "finalizers/namespaces";

/// Finalizer token gating team cleanup
pub const TEAM_FINALIZER: &str = "finalizers/teams";

/// Field manager name used for all server-side writes
pub const FIELD_MANAGER: &str = "nebula-controller";

/// API group of the Kubernetes RBAC resources we generate
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Derive the canonical team label value from a team name.
///
/// Team names may contain characters that are not valid in label values,
/// so the label carries the base64url encoding (no padding) of the name.
/// base64url's alphabet (`A-Za-z0-9-_`) is label-safe.
pub fn team_label_value(team: &str) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    URL_SAFE_NO_PAD.encode(team.as_bytes())
}
