//! Team reconciler
//!
//! Converges a Team toward its derived RBAC footprint: one ClusterRole and
//! one ClusterRoleBinding per tier (admin, regular, viewer), the manager
//! seeded as the sole initial subject of the admin binding, and a controller
//! owner reference on every namespace carrying the team's derived label.
//!
//! A binding whose role reference has diverged cannot be repaired in place;
//! the reconciler deletes it and returns a retryable conflict error so the
//! next invocation recreates it from the template.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use nebula_common::crd::Team;
use nebula_common::rbac::{
    team_cluster_role, team_cluster_role_binding, team_resource_name, user_subject, TeamTier,
};
use nebula_common::{team_label_value, Error, FIELD_MANAGER, TEAM_FINALIZER, TEAM_LABEL_KEY};

use crate::diff::{evaluate_binding_role_ref, evaluate_cluster_role, has_subject, Observation};
use crate::finalizer;

/// Trait abstracting Kubernetes client operations for the team reconciler
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TeamKubeClient: Send + Sync {
    /// Replace the team's finalizer list
    async fn set_finalizers(&self, team: &str, finalizers: Vec<String>) -> Result<(), Error>;

    /// Get a ClusterRole, None if it does not exist
    async fn get_cluster_role(&self, name: &str) -> Result<Option<ClusterRole>, Error>;

    /// Create a ClusterRole
    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<(), Error>;

    /// Overwrite the rules, labels, and annotations of an existing ClusterRole
    async fn update_cluster_role(&self, role: &ClusterRole) -> Result<(), Error>;

    /// Get a ClusterRoleBinding, None if it does not exist
    async fn get_cluster_role_binding(&self, name: &str)
        -> Result<Option<ClusterRoleBinding>, Error>;

    /// Create a ClusterRoleBinding
    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding)
        -> Result<(), Error>;

    /// Replace the subject list of an existing ClusterRoleBinding
    async fn set_cluster_role_binding_subjects(
        &self,
        name: &str,
        subjects: &[Subject],
    ) -> Result<(), Error>;

    /// Delete a ClusterRoleBinding; NotFound is success
    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), Error>;

    /// List the namespaces carrying the given team label value
    async fn list_team_namespaces(&self, label_value: &str) -> Result<Vec<Namespace>, Error>;

    /// Attach an owner reference to a namespace, preserving existing ones
    async fn set_namespace_owner(
        &self,
        namespace: &Namespace,
        owner: &OwnerReference,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct TeamKubeClientImpl {
    client: Client,
}

impl TeamKubeClientImpl {
    /// Create a new TeamKubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TeamKubeClient for TeamKubeClientImpl {
    async fn set_finalizers(&self, team: &str, finalizers: Vec<String>) -> Result<(), Error> {
        let api: Api<Team> = Api::all(self.client.clone());
        let patch = serde_json::json!({
            "metadata": { "finalizers": finalizers }
        });
        api.patch(
            team,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn get_cluster_role(&self, name: &str) -> Result<Option<ClusterRole>, Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(role) => Ok(Some(role)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<(), Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        api.create(&PostParams::default(), role).await?;
        Ok(())
    }

    async fn update_cluster_role(&self, role: &ClusterRole) -> Result<(), Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        let name = role.name_any();
        let patch = serde_json::json!({
            "metadata": {
                "labels": role.metadata.labels,
                "annotations": role.metadata.annotations,
            },
            "rules": role.rules,
        });
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn get_cluster_role_binding(
        &self,
        name: &str,
    ) -> Result<Option<ClusterRoleBinding>, Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(binding) => Ok(Some(binding)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_cluster_role_binding(
        &self,
        binding: &ClusterRoleBinding,
    ) -> Result<(), Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.create(&PostParams::default(), binding).await?;
        Ok(())
    }

    async fn set_cluster_role_binding_subjects(
        &self,
        name: &str,
        subjects: &[Subject],
    ) -> Result<(), Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "subjects": subjects });
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(binding = %name, "cluster role binding already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_team_namespaces(&self, label_value: &str) -> Result<Vec<Namespace>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let params =
            ListParams::default().labels(&format!("{}={}", TEAM_LABEL_KEY, label_value));
        let list = api.list(&params).await?;
        Ok(list.items)
    }

    async fn set_namespace_owner(
        &self,
        namespace: &Namespace,
        owner: &OwnerReference,
    ) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let mut refs = namespace.metadata.owner_references.clone().unwrap_or_default();
        refs.push(owner.clone());
        let patch = serde_json::json!({
            "metadata": { "ownerReferences": refs }
        });
        api.patch(
            &namespace.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

/// Shared context for the team reconciler
pub struct Context {
    /// Kubernetes client operations (mockable)
    pub kube: Arc<dyn TeamKubeClient>,
}

impl Context {
    /// Create a context backed by the real Kubernetes client
    pub fn new(client: Client) -> Self {
        Self {
            kube: Arc::new(TeamKubeClientImpl::new(client)),
        }
    }

    /// Create a context with an injected client, for tests
    pub fn for_testing(kube: Arc<dyn TeamKubeClient>) -> Self {
        Self { kube }
    }
}

/// Reconcile a Team
///
/// Tiers are processed sequentially in a fixed order; a failure on one tier
/// leaves earlier tiers converged and the retry picks up the rest. A binding
/// role-reference conflict aborts the pass with a retryable error after
/// deleting the offending binding.
#[instrument(skip(team, ctx), fields(team = %team.name_any()))]
pub async fn reconcile(team: Arc<Team>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = team.name_any();

    if team.metadata.deletion_timestamp.is_some() {
        if finalizer::has_token(&team.metadata, TEAM_FINALIZER) {
            cleanup(&team);
            info!("releasing team finalizer");
            ctx.kube
                .set_finalizers(&name, finalizer::without_token(&team.metadata, TEAM_FINALIZER))
                .await?;
        }
        return Ok(Action::await_change());
    }

    if !finalizer::has_token(&team.metadata, TEAM_FINALIZER) {
        info!("attaching team finalizer");
        ctx.kube
            .set_finalizers(&name, finalizer::with_token(&team.metadata, TEAM_FINALIZER))
            .await?;
        // Defer convergence to the next invocation so the finalizer write
        // settles before any RBAC object is created.
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    for tier in TeamTier::ALL {
        ensure_cluster_role(&name, tier, &ctx).await?;
    }

    let manager = team.spec.manager.as_deref().filter(|m| !m.is_empty());
    for tier in TeamTier::ALL {
        ensure_cluster_role_binding(&name, tier, manager, &ctx).await?;
    }

    bind_namespaces(&team, &ctx).await?;

    Ok(Action::await_change())
}

/// Error policy for the team controller: requeue with backoff
pub fn error_policy(team: Arc<Team>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        team = %team.name_any(),
        retryable = error.is_retryable(),
        "team reconciliation failed"
    );
    Action::requeue(Duration::from_secs(5))
}

/// Deletion-time cleanup hook.
///
/// Extension point; the generated cluster-scoped RBAC objects carry the team
/// label and are swept by ownership, so there is nothing to clean up today.
fn cleanup(_team: &Team) {}

/// Converge one tier's ClusterRole: create it when absent, overwrite rules,
/// labels, and annotations when any of them drifted.
async fn ensure_cluster_role(team: &str, tier: TeamTier, ctx: &Context) -> Result<(), Error> {
    let desired = team_cluster_role(team, tier);
    let role_name = team_resource_name(team, tier);
    let observed = ctx.kube.get_cluster_role(&role_name).await?;
    match evaluate_cluster_role(&desired, observed.as_ref()) {
        Observation::Absent => {
            info!(team = %team, role = %role_name, "creating team cluster role");
            ctx.kube.create_cluster_role(&desired).await?;
        }
        Observation::NeedsUpdate => {
            info!(team = %team, role = %role_name, "updating drifted team cluster role");
            ctx.kube.update_cluster_role(&desired).await?;
        }
        Observation::Equivalent | Observation::Conflicting => {}
    }
    Ok(())
}

/// Converge one tier's ClusterRoleBinding.
///
/// At creation time the admin tier is seeded with the manager as its only
/// subject. On an existing binding the subject list is append-only: the
/// manager is added when missing and subjects granted out of band are never
/// removed or reordered. A diverged role reference is deleted and surfaced
/// as a retryable conflict; the recreate happens on the next invocation.
async fn ensure_cluster_role_binding(
    team: &str,
    tier: TeamTier,
    manager: Option<&str>,
    ctx: &Context,
) -> Result<(), Error> {
    let mut desired = team_cluster_role_binding(team, tier);
    let binding_name = team_resource_name(team, tier);

    let Some(observed) = ctx.kube.get_cluster_role_binding(&binding_name).await? else {
        if tier == TeamTier::Admin {
            if let Some(manager) = manager {
                desired.subjects = Some(vec![user_subject(manager)]);
            }
        }
        info!(team = %team, binding = %binding_name, "creating team cluster role binding");
        ctx.kube.create_cluster_role_binding(&desired).await?;
        return Ok(());
    };

    if evaluate_binding_role_ref(&desired, Some(&observed)) == Observation::Conflicting {
        warn!(
            team = %team,
            binding = %binding_name,
            "role reference diverged, deleting conflicting binding"
        );
        ctx.kube.delete_cluster_role_binding(&binding_name).await?;
        return Err(Error::conflict(
            binding_name,
            "role reference diverged from the derived state, waiting for recreate",
        ));
    }

    if tier == TeamTier::Admin {
        if let Some(manager) = manager {
            let subject = user_subject(manager);
            if !has_subject(observed.subjects.as_ref(), &subject) {
                let mut subjects = observed.subjects.clone().unwrap_or_default();
                subjects.push(subject);
                info!(team = %team, manager = %manager, "appending manager to admin binding");
                ctx.kube
                    .set_cluster_role_binding_subjects(&binding_name, &subjects)
                    .await?;
            }
        }
    }

    Ok(())
}

/// Attach a controller owner reference to every namespace carrying the
/// team's derived label that is not already controlled by this team.
async fn bind_namespaces(team: &Team, ctx: &Context) -> Result<(), Error> {
    let name = team.name_any();
    let uid = team.metadata.uid.clone().ok_or_else(|| {
        Error::internal_with_context(
            "team-reconciler",
            format!("team {name} has no uid, cannot own namespaces"),
        )
    })?;

    let owner = OwnerReference {
        api_version: Team::api_version(&()).to_string(),
        kind: Team::kind(&()).to_string(),
        name: name.clone(),
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    };

    let namespaces = ctx.kube.list_team_namespaces(&team_label_value(&name)).await?;
    for ns in &namespaces {
        if is_controlled_by(ns, &owner) {
            continue;
        }
        // The API server admits at most one controller reference per object.
        if let Some(existing) = foreign_controller(ns, &owner) {
            warn!(
                team = %name,
                namespace = %ns.name_any(),
                owner_kind = %existing.kind,
                owner_name = %existing.name,
                "namespace already controlled by another owner, skipping adoption"
            );
            continue;
        }
        info!(team = %name, namespace = %ns.name_any(), "binding namespace to team");
        ctx.kube.set_namespace_owner(ns, &owner).await?;
    }
    Ok(())
}

/// A namespace is controlled by the team when it carries a controller owner
/// reference with the team's uid.
fn is_controlled_by(ns: &Namespace, owner: &OwnerReference) -> bool {
    ns.metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| {
            refs.iter()
                .any(|r| r.controller == Some(true) && r.uid == owner.uid)
        })
}

/// Controller owner reference held by something other than the team, if any
fn foreign_controller<'a>(ns: &'a Namespace, owner: &OwnerReference) -> Option<&'a OwnerReference> {
    ns.metadata.owner_references.as_ref().and_then(|refs| {
        refs.iter()
            .find(|r| r.controller == Some(true) && r.uid != owner.uid)
    })
}
