//! Desired-versus-observed classification of RBAC objects
//!
//! Comparison is structural: label/annotation maps are key-unique and
//! order-insensitive, rule lists are order-sensitive (templates carry a
//! fixed ordering, so this is effectively exact-match). A binding's role
//! reference is immutable once created; any deviation classifies as
//! [`Observation::Conflicting`] and must be resolved by delete-then-recreate,
//! never by repointing in place.

use std::collections::BTreeMap;

use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, Subject};

/// Relationship of an observed object to its desired template
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observation {
    /// No live object exists
    Absent,
    /// The live object matches the template in every authoritative field
    Equivalent,
    /// Mutable fields differ and can be overwritten in place
    NeedsUpdate,
    /// An immutable field differs; the live object must be deleted
    Conflicting,
}

/// Classify an observed ClusterRole against its template.
///
/// Rules, labels, and annotations are all authoritative for cluster roles;
/// a difference in any of them is correctable in place.
pub fn evaluate_cluster_role(desired: &ClusterRole, observed: Option<&ClusterRole>) -> Observation {
    let Some(observed) = observed else {
        return Observation::Absent;
    };
    let rules_equal = desired.rules == observed.rules;
    let labels_equal = maps_equal(&desired.metadata.labels, &observed.metadata.labels);
    let annotations_equal =
        maps_equal(&desired.metadata.annotations, &observed.metadata.annotations);
    if rules_equal && labels_equal && annotations_equal {
        Observation::Equivalent
    } else {
        Observation::NeedsUpdate
    }
}

/// Classify an observed namespace-scoped Role against its template.
///
/// Only the permission rules are authoritative for the namespace default
/// roles; labels and annotations on live roles are not required to match.
pub fn evaluate_role(desired: &Role, observed: Option<&Role>) -> Observation {
    let Some(observed) = observed else {
        return Observation::Absent;
    };
    if desired.rules == observed.rules {
        Observation::Equivalent
    } else {
        Observation::NeedsUpdate
    }
}

/// Classify an observed ClusterRoleBinding's role reference.
///
/// The role reference is the binding's immutable identity field. Subjects
/// are deliberately not compared here; subject convergence is append-only
/// and decided with [`has_subject`].
pub fn evaluate_binding_role_ref(
    desired: &ClusterRoleBinding,
    observed: Option<&ClusterRoleBinding>,
) -> Observation {
    let Some(observed) = observed else {
        return Observation::Absent;
    };
    if desired.role_ref == observed.role_ref {
        Observation::Equivalent
    } else {
        Observation::Conflicting
    }
}

/// Set-membership check for binding subjects.
///
/// Deep equality over {apiGroup, kind, name, namespace}; used to decide
/// whether an append is needed without perturbing or reordering the
/// existing subject list.
pub fn has_subject(subjects: Option<&Vec<Subject>>, candidate: &Subject) -> bool {
    subjects.is_some_and(|s| s.iter().any(|existing| existing == candidate))
}

/// Compare two optional label/annotation maps, treating absent as empty
fn maps_equal(a: &Option<BTreeMap<String, String>>, b: &Option<BTreeMap<String, String>>) -> bool {
    static EMPTY: BTreeMap<String, String> = BTreeMap::new();
    a.as_ref().unwrap_or(&EMPTY) == b.as_ref().unwrap_or(&EMPTY)
}
