//! catalogd operator - reconciles addons configurations into a service catalog

use std::time::Duration;

use clap::Parser;
use kube::{Api, Client, CustomResourceExt};

use catalogd_common::crd::{AddonsConfiguration, ClusterAddonsConfiguration};
use catalogd_common::telemetry::{init_telemetry, TelemetryConfig};
use catalogd_common::{DEFAULT_BROKER_NAMESPACE, DEFAULT_BROKER_SERVICE};
use catalogd_controller::broker::BrokerConfig;
use catalogd_controller::controller::Context;

mod controller_runner;

/// catalogd - addons configuration controller
#[derive(Parser, Debug)]
#[command(name = "catalogd", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Accept plain http repository URLs
    #[arg(long, env = "APP_DEVELOP_MODE")]
    develop_mode: bool,

    /// Namespace of the broker service
    #[arg(long, env = "APP_BROKER_NAMESPACE", default_value = DEFAULT_BROKER_NAMESPACE)]
    broker_namespace: String,

    /// Name of the broker service
    #[arg(long, env = "APP_BROKER_SERVICE", default_value = DEFAULT_BROKER_SERVICE)]
    broker_service: String,

    /// Port of the broker service
    #[arg(long, env = "APP_BROKER_PORT", default_value_t = 80)]
    broker_port: u16,

    /// OTLP collector endpoint; logs only when unset
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    /// Timeout for fetching repository documents
    #[arg(long, default_value_t = 30)]
    fetch_timeout_secs: u64,
}

impl Cli {
    fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            name: self.broker_service.clone(),
            service_namespace: self.broker_namespace.clone(),
            service_name: self.broker_service.clone(),
            port: self.broker_port,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crd_manifests()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        otlp_endpoint: cli.otlp_endpoint.clone(),
        ..Default::default()
    })?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let builder = Context::builder(client.clone())
        .broker_config(cli.broker_config())
        .fetch_timeout(Duration::from_secs(cli.fetch_timeout_secs))
        .develop_mode(cli.develop_mode);
    if cli.develop_mode {
        tracing::warn!("develop mode: plain http repositories are accepted");
    }

    let controllers = controller_runner::build_configuration_controllers(client, builder)?;
    tracing::info!(count = controllers.len(), "catalogd controllers started");
    futures::future::join_all(controllers).await;

    tracing::info!("catalogd shutting down");
    Ok(())
}

/// Both CRDs as a YAML stream
fn crd_manifests() -> anyhow::Result<String> {
    let namespaced = serde_yaml::to_string(&AddonsConfiguration::crd())
        .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {}", e))?;
    let cluster = serde_yaml::to_string(&ClusterAddonsConfiguration::crd())
        .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {}", e))?;
    Ok(format!("{namespaced}---\n{cluster}"))
}

/// Install the CRDs with server-side apply so they match this binary
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(catalogd_common::FIELD_MANAGER).force();

    for crd in [AddonsConfiguration::crd(), ClusterAddonsConfiguration::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install CRD {}: {}", name, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crd_manifests_hold_both_kinds() {
        let yaml = crd_manifests().unwrap();
        assert!(yaml.contains("addonsconfigurations.addons.catalogd.dev"));
        assert!(yaml.contains("clusteraddonsconfigurations.addons.catalogd.dev"));
        assert_eq!(yaml.matches("\n---\n").count(), 1);
    }

    #[test]
    fn broker_flags_default_to_helm_broker() {
        let cli = Cli::parse_from(["catalogd"]);
        let config = cli.broker_config();
        assert_eq!(config.name, "helm-broker");
        assert_eq!(config.service_namespace, "kyma-system");
        assert_eq!(config.port, 80);
        assert!(!cli.develop_mode);
    }
}
