//! Viewer operator - reconciles `Viewer` resources into loader Deployments and Services

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{controller, Controller};
use kube::{Api, Client, Resource};

use viewer_operator::config::{ControllerArgs, ControllerConfig};
use viewer_operator::controller::{error_policy, reconcile, Context};
use viewer_operator::crd::Viewer;
use viewer_operator::kube_utils::{create_client, ensure_viewer_crd, viewer_crd_yaml};
use viewer_operator::telemetry::{init_telemetry, TelemetryConfig};
use viewer_operator::{Error, WATCH_TIMEOUT_SECS};

/// Viewer operator - runs visualization workloads declared as Viewer resources
#[derive(Parser, Debug)]
#[command(name = "viewer-operator", version, about, long_about = None)]
struct Cli {
    /// Print the Viewer CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    controller: ControllerArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller (default mode)
    ///
    /// Installs the Viewer CRD, then watches Viewers together with the
    /// Deployments and Services they own.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = viewer_crd_yaml().map_err(|e| anyhow::anyhow!("Failed to render CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.controller).await,
    }
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let kubeconfig = args.kubeconfig.clone();
    let config = args
        .into_config()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    tracing::info!(
        max_viewers = config.max_viewers,
        image = %config.synthesis.image,
        namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        "Viewer controller starting"
    );

    let client = create_client(kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_viewer_crd(&client)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install Viewer CRD: {}", e))?;

    let viewers: Api<Viewer> = scoped_api(&client, &config);
    let deployments: Api<Deployment> = scoped_api(&client, &config);
    let services: Api<Service> = scoped_api(&client, &config);

    let watcher_config = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    let ctx = Arc::new(Context::new(client, config));

    Controller::new(viewers, watcher_config.clone())
        .owns(deployments, watcher_config.clone())
        .owns(services, watcher_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move { log_reconcile_result(result) })
        .await;

    tracing::info!("Viewer controller shutting down");
    Ok(())
}

fn scoped_api<K>(client: &Client, config: &ControllerConfig) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    match &config.watch_namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

type ReconcileResult =
    Result<(ObjectRef<Viewer>, Action), controller::Error<Error, kube::runtime::watcher::Error>>;

fn log_reconcile_result(result: ReconcileResult) {
    match result {
        Ok((viewer, action)) => {
            tracing::debug!(viewer = %viewer.name, ?action, "Viewer reconciliation completed");
        }
        Err(controller::Error::ReconcilerFailed(e, viewer)) => {
            tracing::debug!(viewer = %viewer.name, error = %e, "Viewer reconciliation failed");
        }
        Err(e) => {
            tracing::error!(error = ?e, "Viewer controller error");
        }
    }
}
