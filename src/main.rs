//! oam-runtime operator - reconciles OAM workloads and traits

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::{Action, Error as ControllerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt, Resource, ResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use oam_runtime::config::ReconcileConfig;
use oam_runtime::controller::{manual_scaler, workload, Context};
use oam_runtime::crd::{ContainerizedWorkload, ManualScalerTrait, WorkloadDefinition};
use oam_runtime::registry::TypeRegistry;
use oam_runtime::webhook::webhook_router;
use oam_runtime::{DEFAULT_FIELD_MANAGER, DEFAULT_RECONCILE_WAIT_SECS, DEFAULT_WEBHOOK_PORT};

/// oam-runtime - reconciles OAM ContainerizedWorkloads and ManualScalerTraits
#[derive(Parser, Debug)]
#[command(name = "oam-runtime", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Seconds before a failed reconcile is retried
    #[arg(long, env = "OAM_RECONCILE_WAIT_SECS", default_value_t = DEFAULT_RECONCILE_WAIT_SECS, global = true)]
    reconcile_wait_secs: u64,

    /// Field manager for CRD installs, status writes and trait patches
    #[arg(long, env = "OAM_FIELD_MANAGER", default_value = DEFAULT_FIELD_MANAGER, global = true)]
    field_manager: String,

    /// Address the admission webhook listens on
    #[arg(
        long,
        env = "OAM_WEBHOOK_ADDR",
        default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_WEBHOOK_PORT)),
        global = true
    )]
    webhook_addr: SocketAddr,

    /// PEM certificate for the webhook; serves plain HTTP when absent
    #[arg(long, env = "OAM_WEBHOOK_CERT", requires = "webhook_key", global = true)]
    webhook_cert: Option<PathBuf>,

    /// PEM private key for the webhook
    #[arg(long, env = "OAM_WEBHOOK_KEY", requires = "webhook_cert", global = true)]
    webhook_key: Option<PathBuf>,

    /// Do not serve the admission webhook from the controller
    #[arg(long, global = true)]
    no_webhook: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers (default mode)
    ///
    /// Installs the CRDs, then runs:
    /// - the ContainerizedWorkload controller, which owns Deployments and Services
    /// - the ManualScalerTrait controller, which watches the Deployments it scales
    /// - the admission webhook, unless --no-webhook is given
    Controller,

    /// Serve only the admission webhook
    Webhook,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // kube and axum-server both link rustls; pick the provider explicitly
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {e:?}");
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if cli.crd {
        for crd in all_crds() {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    match cli.command {
        Some(Commands::Webhook) => serve_webhook(&cli).await,
        Some(Commands::Controller) | None => run_controller(&cli).await,
    }
}

fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        ContainerizedWorkload::crd(),
        ManualScalerTrait::crd(),
        WorkloadDefinition::crd(),
    ]
}

/// Install the OAM CRDs with server-side apply so their schema always
/// matches this binary
async fn ensure_crds_installed(client: &Client, field_manager: &str) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(field_manager).force();

    for crd in all_crds() {
        let name = crd.name_any();
        tracing::info!(crd = %name, "Installing CRD...");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    tracing::info!("All OAM CRDs installed/updated");
    Ok(())
}

/// Serve the admission webhook until the process is stopped
async fn serve_webhook(cli: &Cli) -> anyhow::Result<()> {
    let app = webhook_router();
    let addr = cli.webhook_addr;

    match (&cli.webhook_cert, &cli.webhook_key) {
        (Some(cert), Some(key)) => {
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| anyhow::anyhow!("TLS config error: {}", e))?;
            tracing::info!(%addr, "Starting admission webhook (TLS)");
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
                .map_err(|e| anyhow::anyhow!("Webhook server error: {}", e))
        }
        _ => {
            tracing::info!(%addr, "Starting admission webhook (plain HTTP)");
            axum_server::bind(addr)
                .serve(app.into_make_service())
                .await
                .map_err(|e| anyhow::anyhow!("Webhook server error: {}", e))
        }
    }
}

fn reconcile_config(cli: &Cli) -> ReconcileConfig {
    ReconcileConfig::default()
        .with_reconcile_wait(Duration::from_secs(cli.reconcile_wait_secs))
        .with_field_manager(&cli.field_manager)
}

/// Outcome of one pass as yielded by a controller stream
type PassResult<K> =
    Result<(ObjectRef<K>, Action), ControllerError<oam_runtime::Error, watcher::Error>>;

/// Log each controller outcome. Reconciler failures carry the stage tag so
/// a failing step can be filtered on directly.
fn log_reconcile_result<K: Resource>(
    kind: &'static str,
) -> impl Fn(PassResult<K>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok((object, action)) => tracing::debug!(
                kind,
                name = %object.name,
                namespace = ?object.namespace,
                ?action,
                "Reconciliation completed"
            ),
            Err(ControllerError::ReconcilerFailed(error, object)) => tracing::warn!(
                kind,
                name = %object.name,
                namespace = ?object.namespace,
                stage = error.stage(),
                retryable = error.is_retryable(),
                %error,
                "Reconciliation failed"
            ),
            Err(ControllerError::ObjectNotFound(object)) => {
                tracing::debug!(kind, name = %object.name, "Object gone before reconcile")
            }
            Err(error) => tracing::error!(kind, %error, "Controller error"),
        }
        std::future::ready(())
    }
}

/// Run both controllers, and the webhook unless disabled, until a shutdown
/// signal arrives
async fn run_controller(cli: &Cli) -> anyhow::Result<()> {
    tracing::info!("oam-runtime controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client, &cli.field_manager).await?;

    let config = reconcile_config(cli);
    let registry = Arc::new(TypeRegistry::standard());
    let workload_ctx = Arc::new(Context::from_client(
        client.clone(),
        registry.clone(),
        config.clone(),
        "oam-workload-controller",
    ));
    let trait_ctx = Arc::new(Context::from_client(
        client.clone(),
        registry,
        config,
        "oam-manualscaler-controller",
    ));

    tracing::info!("Starting OAM controllers...");
    tracing::info!("  - ContainerizedWorkload controller");
    tracing::info!("  - ManualScalerTrait controller");

    let workload_controller = Controller::new(
        Api::<ContainerizedWorkload>::all(client.clone()),
        WatcherConfig::default(),
    )
    .owns(Api::<Deployment>::all(client.clone()), WatcherConfig::default())
    .owns(Api::<Service>::all(client.clone()), WatcherConfig::default())
    .shutdown_on_signal()
    .run(workload::reconcile, workload::error_policy, workload_ctx)
    .for_each(log_reconcile_result("ContainerizedWorkload"));

    let trait_controller = Controller::new(
        Api::<ManualScalerTrait>::all(client.clone()),
        WatcherConfig::default(),
    )
    .watches(
        Api::<Deployment>::all(client),
        WatcherConfig::default(),
        manual_scaler::traits_for_child,
    )
    .shutdown_on_signal()
    .run(
        manual_scaler::reconcile,
        manual_scaler::error_policy,
        trait_ctx,
    )
    .for_each(log_reconcile_result("ManualScalerTrait"));

    let webhook = async {
        if cli.no_webhook {
            std::future::pending::<anyhow::Result<()>>().await
        } else {
            serve_webhook(cli).await
        }
    };

    tokio::select! {
        _ = workload_controller => {
            tracing::info!("Workload controller completed");
        }
        _ = trait_controller => {
            tracing::info!("Trait controller completed");
        }
        result = webhook => {
            result?;
        }
    }

    tracing::info!("oam-runtime controller shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["oam-runtime"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.reconcile_wait_secs, 30);
        assert_eq!(cli.webhook_addr, "0.0.0.0:9443".parse::<SocketAddr>().unwrap());
        assert!(!cli.no_webhook);
        assert_eq!(reconcile_config(&cli), ReconcileConfig::default());
    }

    #[test]
    fn test_flags_reach_reconcile_config() {
        let cli = Cli::try_parse_from([
            "oam-runtime",
            "controller",
            "--reconcile-wait-secs",
            "5",
            "--field-manager",
            "oam-staging",
        ])
        .unwrap();
        let config = reconcile_config(&cli);
        assert_eq!(config.reconcile_wait, Duration::from_secs(5));
        assert_eq!(config.field_manager, "oam-staging");
    }

    #[tokio::test]
    async fn test_log_reconcile_result_accepts_every_outcome() {
        let log = log_reconcile_result::<ManualScalerTrait>("ManualScalerTrait");
        let object = ObjectRef::<ManualScalerTrait>::new("web-scaler").within("shop");

        log(Ok((object.clone(), Action::await_change()))).await;
        log(Err(ControllerError::ReconcilerFailed(
            oam_runtime::Error::scale("web-deployment", "conflict"),
            object.clone().erase(),
        )))
        .await;
        log(Err(ControllerError::ObjectNotFound(object.erase()))).await;
    }

    #[test]
    fn test_cert_requires_key() {
        assert!(Cli::try_parse_from(["oam-runtime", "--webhook-cert", "tls.crt"]).is_err());
    }

    #[test]
    fn test_crds_cover_every_kind() {
        let names: Vec<String> = all_crds().iter().map(|c| c.name_any()).collect();
        assert_eq!(
            names,
            vec![
                "containerizedworkloads.core.oam.dev",
                "manualscalertraits.core.oam.dev",
                "workloaddefinitions.core.oam.dev",
            ]
        );
    }
}
