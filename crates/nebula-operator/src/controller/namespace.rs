//! Namespace reconciler
//!
//! Converges a namespace's access-control state: derives the team label from
//! the team annotation, ensures the three default namespace-scoped roles
//! exist with the canonical rule sets while the namespace is team-controlled,
//! and tears the role bindings down when it no longer is. Deletion is gated
//! by the `finalizers/namespaces` token.
//!
//! Every mutation is a fetch-check-write triple; the reconciler holds no
//! state between invocations and stays correct under repeated delivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument};

#[cfg(test)]
use mockall::automock;

use nebula_common::rbac::{namespace_default_roles, NAMESPACE_ROLE_NAMES};
use nebula_common::{
    team_label_value, Error, FIELD_MANAGER, NAMESPACE_FINALIZER, TEAM_ANNOTATION_KEY,
    TEAM_LABEL_KEY,
};

use crate::diff::{evaluate_role, Observation};
use crate::finalizer;

/// Trait abstracting Kubernetes client operations for the namespace reconciler
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NamespaceKubeClient: Send + Sync {
    /// Replace the namespace's finalizer list
    async fn set_finalizers(&self, namespace: &str, finalizers: Vec<String>) -> Result<(), Error>;

    /// Set the team label on the namespace
    async fn set_team_label(&self, namespace: &str, value: &str) -> Result<(), Error>;

    /// Get a namespace-scoped Role, None if it does not exist
    async fn get_role(&self, namespace: &str, name: &str) -> Result<Option<Role>, Error>;

    /// Create a namespace-scoped Role
    async fn create_role(&self, namespace: &str, role: &Role) -> Result<(), Error>;

    /// Overwrite the rules of an existing namespace-scoped Role
    async fn update_role_rules(
        &self,
        namespace: &str,
        name: &str,
        rules: &[PolicyRule],
    ) -> Result<(), Error>;

    /// Delete a namespace-scoped RoleBinding; NotFound is success
    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct NamespaceKubeClientImpl {
    client: Client,
}

impl NamespaceKubeClientImpl {
    /// Create a new NamespaceKubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NamespaceKubeClient for NamespaceKubeClientImpl {
    async fn set_finalizers(&self, namespace: &str, finalizers: Vec<String>) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let patch = serde_json::json!({
            "metadata": { "finalizers": finalizers }
        });
        api.patch(
            namespace,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn set_team_label(&self, namespace: &str, value: &str) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let patch = serde_json::json!({
            "metadata": { "labels": { TEAM_LABEL_KEY: value } }
        });
        api.patch(
            namespace,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn get_role(&self, namespace: &str, name: &str) -> Result<Option<Role>, Error> {
        let api: Api<Role> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(role) => Ok(Some(role)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_role(&self, namespace: &str, role: &Role) -> Result<(), Error> {
        let api: Api<Role> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), role).await?;
        Ok(())
    }

    async fn update_role_rules(
        &self,
        namespace: &str,
        name: &str,
        rules: &[PolicyRule],
    ) -> Result<(), Error> {
        let api: Api<Role> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "rules": rules });
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(namespace = %namespace, binding = %name, "role binding already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Shared context for the namespace reconciler
pub struct Context {
    /// Kubernetes client operations (mockable)
    pub kube: Arc<dyn NamespaceKubeClient>,
}

impl Context {
    /// Create a context backed by the real Kubernetes client
    pub fn new(client: Client) -> Self {
        Self {
            kube: Arc::new(NamespaceKubeClientImpl::new(client)),
        }
    }

    /// Create a context with an injected client, for tests
    pub fn for_testing(kube: Arc<dyn NamespaceKubeClient>) -> Self {
        Self { kube }
    }
}

/// Reconcile a Namespace
///
/// Observes the fetched object and applies the minimal set of mutations to
/// converge it. The first pass on a new namespace only attaches the
/// finalizer and requeues; convergence happens on re-invocation.
#[instrument(skip(ns, ctx), fields(namespace = %ns.name_any()))]
pub async fn reconcile(ns: Arc<Namespace>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = ns.name_any();

    if ns.metadata.deletion_timestamp.is_some() {
        if finalizer::has_token(&ns.metadata, NAMESPACE_FINALIZER) {
            cleanup(&ns);
            info!("releasing namespace finalizer");
            ctx.kube
                .set_finalizers(&name, finalizer::without_token(&ns.metadata, NAMESPACE_FINALIZER))
                .await?;
        }
        return Ok(Action::await_change());
    }

    if !finalizer::has_token(&ns.metadata, NAMESPACE_FINALIZER) {
        info!("attaching namespace finalizer");
        ctx.kube
            .set_finalizers(&name, finalizer::with_token(&ns.metadata, NAMESPACE_FINALIZER))
            .await?;
        // Defer the remaining work to the next invocation so the finalizer
        // write settles before any dependent mutation.
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let team_label = check_or_add_team_label(&ns, &ctx).await?;

    let team_controlled = team_label.as_deref().is_some_and(|v| !v.is_empty());
    if !team_controlled {
        delete_role_bindings(&ns, &ctx).await?;
        return Ok(Action::await_change());
    }

    ensure_default_roles(&ns, &ctx).await?;

    Ok(Action::await_change())
}

/// Error policy for the namespace controller: requeue with backoff
pub fn error_policy(ns: Arc<Namespace>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        namespace = %ns.name_any(),
        retryable = error.is_retryable(),
        "namespace reconciliation failed"
    );
    Action::requeue(Duration::from_secs(5))
}

/// Deletion-time cleanup hook.
///
/// Extension point; namespace-scoped RBAC objects are garbage collected with
/// the namespace itself, so there is nothing to clean up today.
fn cleanup(_ns: &Namespace) {}

/// Derive the team label from the team annotation if needed.
///
/// Returns the effective label value after this pass: the derived value when
/// a non-empty team annotation is set (persisting it when the live label is
/// missing, empty, or stale), otherwise whatever label the namespace already
/// carries.
async fn check_or_add_team_label(ns: &Namespace, ctx: &Context) -> Result<Option<String>, Error> {
    let current = ns.labels().get(TEAM_LABEL_KEY).cloned();

    let team = ns
        .annotations()
        .get(TEAM_ANNOTATION_KEY)
        .filter(|v| !v.is_empty());
    let Some(team) = team else {
        return Ok(current);
    };

    let derived = team_label_value(team);
    if current.as_deref() != Some(derived.as_str()) {
        info!(team = %team, label = %derived, "deriving team label from annotation");
        ctx.kube.set_team_label(&ns.name_any(), &derived).await?;
    }
    Ok(Some(derived))
}

/// Ensure the default roles exist with the canonical rule sets.
///
/// Tiers are processed sequentially and independently; a failure on one tier
/// leaves earlier tiers applied and the next invocation reconverges the rest.
async fn ensure_default_roles(ns: &Namespace, ctx: &Context) -> Result<(), Error> {
    let namespace = ns.name_any();
    for desired in namespace_default_roles() {
        let Some(role_name) = desired.metadata.name.clone() else {
            continue;
        };
        let observed = ctx.kube.get_role(&namespace, &role_name).await?;
        match evaluate_role(&desired, observed.as_ref()) {
            Observation::Absent => {
                info!(namespace = %namespace, role = %role_name, "creating default role");
                ctx.kube.create_role(&namespace, &desired).await?;
            }
            Observation::NeedsUpdate => {
                info!(namespace = %namespace, role = %role_name, "updating default role rules");
                ctx.kube
                    .update_role_rules(
                        &namespace,
                        &role_name,
                        desired.rules.as_deref().unwrap_or_default(),
                    )
                    .await?;
            }
            Observation::Equivalent | Observation::Conflicting => {}
        }
    }
    Ok(())
}

/// Remove the default role bindings from a namespace that is not (or no
/// longer) team-controlled. Absent bindings are treated as success.
async fn delete_role_bindings(ns: &Namespace, ctx: &Context) -> Result<(), Error> {
    let namespace = ns.name_any();
    for name in NAMESPACE_ROLE_NAMES {
        info!(namespace = %namespace, binding = %name, "deleting role binding");
        ctx.kube.delete_role_binding(&namespace, name).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use std::collections::BTreeMap;

    fn namespace_named(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn finalized(mut ns: Namespace) -> Namespace {
        ns.metadata.finalizers = Some(vec![NAMESPACE_FINALIZER.to_string()]);
        ns
    }

    fn with_team_annotation(mut ns: Namespace, team: &str) -> Namespace {
        ns.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(TEAM_ANNOTATION_KEY.to_string(), team.to_string());
        ns
    }

    fn with_team_label(mut ns: Namespace, value: &str) -> Namespace {
        ns.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(TEAM_LABEL_KEY.to_string(), value.to_string());
        ns
    }

    fn deleting(mut ns: Namespace) -> Namespace {
        ns.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        ns
    }

    fn role_named(name: &str) -> Role {
        namespace_default_roles()
            .into_iter()
            .find(|r| r.metadata.name.as_deref() == Some(name))
            .expect("known default role")
    }

    fn ctx(mock: MockNamespaceKubeClient) -> Arc<Context> {
        Arc::new(Context::for_testing(Arc::new(mock)))
    }

    /// Story: the first pass on a fresh namespace only attaches the
    /// finalizer; all other convergence is deferred to the next invocation.
    #[tokio::test]
    async fn story_first_pass_attaches_finalizer_and_defers() {
        let ns = Arc::new(with_team_annotation(namespace_named("web"), "acme"));

        let mut mock = MockNamespaceKubeClient::new();
        mock.expect_set_finalizers()
            .withf(|ns, finalizers| {
                ns == "web" && finalizers == &[NAMESPACE_FINALIZER.to_string()]
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let action = reconcile(ns, ctx(mock)).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(1)));
    }

    /// Story: a namespace annotated with a team gets the base64url-derived
    /// team label persisted, and the default roles created.
    #[tokio::test]
    async fn story_team_label_is_derived_from_annotation() {
        let ns = Arc::new(with_team_annotation(finalized(namespace_named("web")), "acme"));

        let mut mock = MockNamespaceKubeClient::new();
        mock.expect_set_team_label()
            .withf(|ns, value| ns == "web" && value == "YWNtZQ")
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_get_role().returning(|_, _| Ok(None));
        mock.expect_create_role().times(3).returning(|_, _| Ok(()));

        reconcile(ns, ctx(mock)).await.unwrap();
    }

    /// Story: a stale label (left over from a rename or external edit) is
    /// repaired to the derived value.
    #[tokio::test]
    async fn story_stale_team_label_is_repaired() {
        let ns = Arc::new(with_team_label(
            with_team_annotation(finalized(namespace_named("web")), "acme"),
            "c3RhbGU",
        ));

        let mut mock = MockNamespaceKubeClient::new();
        mock.expect_set_team_label()
            .withf(|_, value| value == "YWNtZQ")
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_get_role()
            .returning(|_, name| Ok(Some(role_named(name))));

        reconcile(ns, ctx(mock)).await.unwrap();
    }

    /// Story: a converged namespace produces zero writes on re-invocation.
    /// The mock has no write expectations; any Create/Update/Delete call
    /// would fail the test.
    #[tokio::test]
    async fn story_second_pass_is_a_no_op() {
        let ns = Arc::new(with_team_label(
            with_team_annotation(finalized(namespace_named("web")), "acme"),
            "YWNtZQ",
        ));

        let mut mock = MockNamespaceKubeClient::new();
        mock.expect_get_role()
            .times(3)
            .returning(|_, name| Ok(Some(role_named(name))));

        let action = reconcile(ns, ctx(mock)).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// Story: a namespace without team control gets its role bindings torn
    /// down; the delete path treats NotFound as success inside the client.
    #[tokio::test]
    async fn story_uncontrolled_namespace_tears_down_bindings() {
        let ns = Arc::new(finalized(namespace_named("scratch")));

        let mut mock = MockNamespaceKubeClient::new();
        for name in NAMESPACE_ROLE_NAMES {
            mock.expect_delete_role_binding()
                .withf(move |ns, binding| ns == "scratch" && binding == name)
                .times(1)
                .returning(|_, _| Ok(()));
        }

        let action = reconcile(ns, ctx(mock)).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// Story: an empty team label means not team-controlled, even if the
    /// label key is present.
    #[tokio::test]
    async fn story_empty_team_label_is_not_controlled() {
        let ns = Arc::new(with_team_label(finalized(namespace_named("scratch")), ""));

        let mut mock = MockNamespaceKubeClient::new();
        mock.expect_delete_role_binding()
            .times(3)
            .returning(|_, _| Ok(()));

        reconcile(ns, ctx(mock)).await.unwrap();
    }

    /// Story: a live role whose rules were tampered with is patched back to
    /// the canonical rule set in place.
    #[tokio::test]
    async fn story_drifted_role_rules_are_reconverged() {
        let ns = Arc::new(with_team_label(
            finalized(namespace_named("web")),
            "YWNtZQ",
        ));

        let mut mock = MockNamespaceKubeClient::new();
        mock.expect_get_role().returning(|_, name| {
            let mut role = role_named(name);
            if name == "developer" {
                role.rules = Some(vec![]);
            }
            Ok(Some(role))
        });
        mock.expect_update_role_rules()
            .withf(|_, name, rules| {
                name == "developer"
                    && rules == role_named("developer").rules.as_deref().unwrap_or_default()
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        reconcile(ns, ctx(mock)).await.unwrap();
    }

    /// Story: a tier failure does not roll back earlier tiers; the error
    /// propagates and later tiers wait for the retry.
    #[tokio::test]
    async fn story_tier_failure_leaves_prior_tiers_applied() {
        let ns = Arc::new(with_team_label(
            finalized(namespace_named("web")),
            "YWNtZQ",
        ));

        let mut mock = MockNamespaceKubeClient::new();
        mock.expect_get_role()
            .withf(|_, name| name == "admin")
            .returning(|_, name| Ok(Some(role_named(name))));
        mock.expect_get_role()
            .withf(|_, name| name == "developer")
            .returning(|_, _| Ok(None));
        mock.expect_create_role()
            .times(1)
            .returning(|_, _| Err(Error::internal_with_context("test", "api unavailable")));
        // No expectation for the viewer role: it must not be touched.

        let result = reconcile(ns, ctx(mock)).await;
        assert!(result.is_err());
    }

    /// Story: deleting a finalized namespace runs cleanup then releases the
    /// finalizer; nothing else is mutated on that pass.
    #[tokio::test]
    async fn story_deletion_releases_finalizer_only() {
        let ns = Arc::new(deleting(finalized(with_team_annotation(
            namespace_named("web"),
            "acme",
        ))));

        let mut mock = MockNamespaceKubeClient::new();
        mock.expect_set_finalizers()
            .withf(|ns, finalizers| ns == "web" && finalizers.is_empty())
            .times(1)
            .returning(|_, _| Ok(()));

        let action = reconcile(ns, ctx(mock)).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// Story: a deleting namespace whose finalizer is already gone is
    /// terminal; no write of any kind is issued.
    #[tokio::test]
    async fn story_deletion_without_finalizer_is_terminal() {
        let ns = Arc::new(deleting(namespace_named("web")));
        let mock = MockNamespaceKubeClient::new();

        let action = reconcile(ns, ctx(mock)).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[test]
    fn test_error_policy_requeues_with_backoff() {
        let ns = Arc::new(namespace_named("web"));
        let ctx = ctx(MockNamespaceKubeClient::new());
        let action = error_policy(ns, &Error::internal_with_context("test", "boom"), ctx);
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    }
}
