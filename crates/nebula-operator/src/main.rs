//! Nebula operator entrypoint
//!
//! Installs the Team CRD, then runs the Namespace and Team controllers until
//! signalled. `--crd` prints the CRD manifest and exits, for cluster setups
//! where the operator's service account cannot write CRDs itself.

use clap::Parser;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use nebula_common::crd::Team;
use nebula_common::FIELD_MANAGER;
use nebula_operator::controller_runner::build_tenant_controllers;

#[derive(Parser, Debug)]
#[command(name = "nebula-operator", version, about = "Team and namespace access-control operator")]
struct Cli {
    /// Print the CRD manifests to stdout and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", serde_yaml::to_string(&Team::crd())?);
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client = Client::try_default().await?;
    ensure_crds_installed(&client).await?;

    info!("Starting controllers:");
    let controllers = build_tenant_controllers(client);
    futures::future::join_all(controllers).await;

    info!("All controllers stopped, exiting");
    Ok(())
}

/// Install or update the Team CRD via server-side apply.
///
/// Forced apply keeps the schema converged on upgrade even if another
/// manager touched it in the meantime.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    let team_crd = Team::crd();
    info!(name = %team_crd.metadata.name.as_deref().unwrap_or_default(), "installing CRD");
    crds.patch(
        "teams.tenant.nebula.dev",
        &params,
        &Patch::Apply(&team_crd),
    )
    .await?;
    Ok(())
}
