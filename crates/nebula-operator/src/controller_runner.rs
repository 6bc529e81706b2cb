//! Controller future construction
//!
//! Wires each reconciler to its watch stream and hands the entrypoint a set
//! of boxed futures to join. Controllers share one client but own their
//! contexts; they never coordinate with each other directly.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{future, StreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::Api;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::{Lookup, ObjectRef};
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::Client;
use tracing::{debug, info, warn};

use nebula_common::crd::Team;
use nebula_common::Error;

use crate::controller::{namespace, team};

/// Watch timeout in seconds, kept under the API server's own cutoff so
/// re-lists happen on our schedule
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Boxed controller future, ready to be joined by the entrypoint
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the Namespace and Team controller futures.
///
/// Both controllers shut down on SIGTERM/SIGINT; in-flight reconciliations
/// drain before the returned futures resolve.
pub fn build_tenant_controllers(client: Client) -> Vec<ControllerFuture> {
    let namespace_ctx = Arc::new(namespace::Context::new(client.clone()));
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let namespace_controller =
        Controller::new(namespaces, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(namespace::reconcile, namespace::error_policy, namespace_ctx)
            .for_each(log_reconcile_result("Namespace"));

    let team_ctx = Arc::new(team::Context::new(client.clone()));
    let teams: Api<Team> = Api::all(client);
    let team_controller =
        Controller::new(teams, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(team::reconcile, team::error_policy, team_ctx)
            .for_each(log_reconcile_result("Team"));

    info!("- Namespace controller");
    info!("- Team controller");

    vec![Box::pin(namespace_controller), Box::pin(team_controller)]
}

/// Per-item logging for a controller's result stream.
///
/// Reconciler errors already log themselves in the error policy with full
/// object context; here stream-level errors (watch failures, queue errors)
/// get surfaced and successes are traced at debug.
fn log_reconcile_result<K>(
    kind: &'static str,
) -> impl FnMut(Result<(ObjectRef<K>, Action), controller::Error<Error, watcher::Error>>) -> future::Ready<()>
where
    K: Lookup,
    K::DynamicType: std::fmt::Debug,
{
    move |result| {
        match result {
            Ok((object, _)) => debug!(kind, object = ?object, "reconciled"),
            Err(error) => warn!(kind, error = ?error, "controller stream error"),
        }
        future::ready(())
    }
}
