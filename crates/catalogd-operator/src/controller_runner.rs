//! Controller runner - builds one controller future per configuration kind
//!
//! Both controllers are built from clones of the same [`ContextBuilder`], so
//! they share the addon and chart stores.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use catalogd_common::crd::{AddonsConfiguration, ClusterAddonsConfiguration};
use catalogd_controller::client::AddonsConfigurationResource;
use catalogd_controller::controller::{error_policy, reconcile, ContextBuilder};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the namespaced and cluster-wide configuration controllers
pub fn build_configuration_controllers(
    client: Client,
    builder: ContextBuilder,
) -> anyhow::Result<Vec<ControllerFuture>> {
    Ok(vec![
        build_controller::<AddonsConfiguration>(client.clone(), builder.clone())?,
        build_controller::<ClusterAddonsConfiguration>(client, builder)?,
    ])
}

fn build_controller<K: AddonsConfigurationResource>(
    client: Client,
    builder: ContextBuilder,
) -> anyhow::Result<ControllerFuture> {
    let ctx = Arc::new(builder.build::<K>()?);
    let api: Api<K> = Api::all(client);

    tracing::info!("- {} controller", K::KIND_NAME);

    Ok(Box::pin(
        Controller::new(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(reconcile::<K>, error_policy::<K>, ctx)
            .for_each(log_reconcile_result(K::KIND_NAME)),
    ))
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(object) => tracing::debug!(?object, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
