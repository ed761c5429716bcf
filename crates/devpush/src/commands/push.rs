//! Push command implementation
//!
//! Implements `devpush push`: renders the component (failing before any
//! cluster contact when the devfile is invalid), connects to the cluster,
//! reconciles, runs the build and starts the run or debug program. The
//! outcome is printed as JSON on stdout.

use crate::commands::shared::{load, write_json, ComponentOptions, LoadArgs};
use crate::ui::spinner::PlainSpinner;
use anyhow::Result;
use devpush_core::component::{render, ComponentAdapter};
use devpush_core::kube_client::KubeClusterClient;
use std::path::PathBuf;
use tracing::{debug, info, instrument};

/// Push command arguments
#[derive(Debug, Clone)]
pub struct PushArgs {
    pub devfile: PathBuf,
    pub settings: Option<PathBuf>,
    pub namespace: Option<String>,
    pub component: ComponentOptions,
    /// Show a spinner on stderr while pushing
    pub spinner: bool,
}

/// Execute the push command
#[instrument(skip(args), fields(devfile = %args.devfile.display()))]
pub async fn execute_push(args: PushArgs) -> Result<()> {
    let loaded = load(LoadArgs {
        devfile: &args.devfile,
        settings: args.settings.as_deref(),
        namespace: args.namespace.as_deref(),
    })?;
    let params = loaded.parameters(args.component);

    // Surface devfile problems before connecting
    let desired = render(&loaded.devfile, &params)?;
    debug!(component = %desired.name, "Devfile is valid");

    let client = KubeClusterClient::connect(&loaded.settings.namespace).await?;
    let adapter = ComponentAdapter::new(client, loaded.settings.readiness_timeout());

    let spinner = args
        .spinner
        .then(|| PlainSpinner::start(&format!("Pushing component {}…", desired.name)));
    let outcome = match adapter.push(&loaded.devfile, &params).await {
        Ok(outcome) => outcome,
        Err(err) => {
            if let Some(spinner) = spinner {
                spinner.fail_with_message(&format!("Push of {} failed", desired.name));
            }
            return Err(err.into());
        }
    };
    if let Some(spinner) = spinner {
        spinner.finish_with_message(&format!(
            "Component {} is running in pod {}",
            outcome.component, outcome.reconcile.pod
        ));
    }

    info!(
        component = %outcome.component,
        action = ?outcome.reconcile.action,
        pod = %outcome.reconcile.pod,
        "Push complete"
    );
    write_json(&outcome)
}
