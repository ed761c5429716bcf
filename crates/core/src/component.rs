//! Component reconciliation
//!
//! A push computes the whole desired state up front ([`DesiredComponent`]):
//! resolved commands, the Deployment with its init containers and volumes,
//! the Service and the volume claims. Every validation and synthesis error
//! surfaces here, before the cluster is touched.
//!
//! [`ComponentAdapter::reconcile`] then applies that state with a single
//! existence probe deciding between two paths:
//!
//! - create: claims, Deployment, then Service (when there are ports);
//! - update: claims, Deployment replaced with the live `resourceVersion`,
//!   Service replaced with the live `clusterIP`, `clusterIPs` and
//!   `resourceVersion` (created if missing).
//!
//! Errors are returned as they happen. Objects already written stay written;
//! there is no rollback.

use crate::cluster::{pod_phase, ClusterClient, PodEvents, POD_PHASE_FAILED, POD_PHASE_RUNNING};
use crate::command::{resolve_debug_command, resolve_push_command_set, CommandMap, CommandOverrides};
use crate::config::PushSettings;
use crate::container::{
    component_labels, label_selector, synthesize_containers, synthesize_volume_claims,
    volume_claim_name, PROJECTS_VOLUME_NAME,
};
use crate::devfile::{Devfile, GroupKind};
use crate::entrypoint::{
    is_wrapped, supervisor_bootstrap_init_container, supervisor_volume, wrap_with_supervisor,
    SupervisorProgram,
};
use crate::errors::{ClusterError, CommandError, DevpushError, Result};
use crate::exec::{execute_command, start_supervised, ExecOutput};
use crate::lifecycle::{build_prestart_init_containers, expand_event_commands, LifecycleEvent};
use crate::naming::{truncate_name, MAX_NAME_LENGTH};
use crate::ports::synthesize_service;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, PersistentVolumeClaim, PersistentVolumeClaimVolumeSource,
    Pod, PodSpec, PodTemplateSpec, Service, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Inputs of a push that do not come from the devfile
#[derive(Debug, Clone, Default)]
pub struct PushParameters {
    /// Component name; defaults to the devfile's metadata name
    pub component_name: Option<String>,
    pub overrides: CommandOverrides,
    /// Start the debug command instead of the run command
    pub debug: bool,
    /// Debug port; defaults to the settings' port
    pub debug_port: Option<i32>,
    pub settings: PushSettings,
}

impl PushParameters {
    pub fn debug_port(&self) -> i32 {
        self.debug_port.unwrap_or(self.settings.debug_port)
    }
}

/// Everything a push writes to the cluster, computed before any write
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredComponent {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub commands: CommandMap,
    pub deployment: Deployment,
    pub service: Option<Service>,
    pub claims: Vec<PersistentVolumeClaim>,
}

impl DesiredComponent {
    pub fn selector(&self) -> String {
        label_selector(&self.labels)
    }

    /// Containers of the pod template
    pub fn containers(&self) -> &[Container] {
        self.pod_spec()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default()
    }

    /// Init containers of the pod template, in execution order
    pub fn init_containers(&self) -> &[Container] {
        self.pod_spec()
            .and_then(|spec| spec.init_containers.as_deref())
            .unwrap_or_default()
    }

    fn pod_spec(&self) -> Option<&PodSpec> {
        self.deployment.spec.as_ref()?.template.spec.as_ref()
    }

    /// Cluster objects in apply order, as JSON values
    pub fn manifests(&self) -> Result<Vec<serde_json::Value>> {
        let to_value = |value: serde_json::Result<serde_json::Value>| {
            value.map_err(|e| {
                DevpushError::Config(crate::errors::ConfigError::Parsing {
                    what: "manifest".to_string(),
                    message: e.to_string(),
                })
            })
        };

        let mut manifests = Vec::new();
        for claim in &self.claims {
            manifests.push(to_value(serde_json::to_value(claim))?);
        }
        manifests.push(to_value(serde_json::to_value(&self.deployment))?);
        if let Some(service) = &self.service {
            manifests.push(to_value(serde_json::to_value(service))?);
        }
        Ok(manifests)
    }
}

/// Which reconcile path ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub action: ReconcileAction,
    /// Name of the running pod found by the readiness wait
    pub pod: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOutcome {
    pub component: String,
    pub reconcile: ReconcileOutcome,
    /// Output of init, build and postStart commands, in execution order
    pub executed: Vec<ExecOutput>,
    /// Supervised program started, if the entrypoint was wrapped
    pub started: Option<SupervisorProgram>,
}

/// Component name as a DNS label
pub fn component_name(devfile: &Devfile, params: &PushParameters) -> String {
    let raw = params
        .component_name
        .as_deref()
        .unwrap_or_else(|| devfile.component_name());
    normalize_component_name(raw)
}

/// Lowercase and truncate a name to fit a DNS label
pub fn normalize_component_name(raw: &str) -> String {
    truncate_name(&raw.to_lowercase(), MAX_NAME_LENGTH)
}

/// Compute the desired state of a component without touching the cluster
#[instrument(skip(devfile, params))]
pub fn render(devfile: &Devfile, params: &PushParameters) -> Result<DesiredComponent> {
    let name = component_name(devfile, params);
    let labels = component_labels(&name);
    let commands = resolve_push_command_set(devfile, &params.overrides)?;
    if params.debug {
        resolve_debug_command(devfile, params.overrides.debug.as_deref())?.ok_or(
            CommandError::GroupNotFound {
                kind: GroupKind::Debug,
            },
        )?;
    }

    let containers = synthesize_containers(devfile)?;
    let containers = wrap_with_supervisor(
        devfile,
        containers,
        params.overrides.run.as_deref(),
        params.overrides.debug.as_deref(),
        Some(params.debug_port()),
    )?;
    let mut init_containers =
        build_prestart_init_containers(devfile, &containers, &params.settings.shell)?;

    let mut volumes = Vec::new();
    if containers.iter().any(is_wrapped) {
        init_containers.insert(
            0,
            supervisor_bootstrap_init_container(&params.settings.bootstrap_image),
        );
        volumes.push(supervisor_volume());
    }
    if mounts_volume(&containers, PROJECTS_VOLUME_NAME) {
        volumes.push(Volume {
            name: PROJECTS_VOLUME_NAME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
    }
    for (volume, _) in devfile.volumes() {
        volumes.push(Volume {
            name: volume.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: volume_claim_name(&name, volume),
                read_only: None,
            }),
            ..Default::default()
        });
    }

    let deployment = build_deployment(&name, &labels, containers, init_containers, volumes);
    let service = synthesize_service(devfile, &name, &labels);
    let claims = synthesize_volume_claims(devfile, &name, &labels)?;

    debug!(
        component = %name,
        commands = commands.len(),
        claims = claims.len(),
        has_service = service.is_some(),
        "Rendered desired component"
    );
    Ok(DesiredComponent {
        name,
        labels,
        commands,
        deployment,
        service,
        claims,
    })
}

fn mounts_volume(containers: &[Container], volume: &str) -> bool {
    containers.iter().any(|c| {
        c.volume_mounts
            .as_ref()
            .is_some_and(|mounts| mounts.iter().any(|m| m.name == volume))
    })
}

/// Single-replica Deployment with the Recreate strategy
pub fn build_deployment(
    name: &str,
    labels: &BTreeMap<String, String>,
    containers: Vec<Container>,
    init_containers: Vec<Container>,
    volumes: Vec<Volume>,
) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(name.to_string()),
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers,
                    init_containers: if init_containers.is_empty() {
                        None
                    } else {
                        Some(init_containers)
                    },
                    volumes: if volumes.is_empty() {
                        None
                    } else {
                        Some(volumes)
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

async fn next_running_pod(events: &mut PodEvents) -> Result<Pod> {
    while let Some(event) = events.recv().await {
        let pod = event?;
        if pod.metadata.deletion_timestamp.is_some() {
            continue;
        }
        match pod_phase(&pod) {
            Some(POD_PHASE_RUNNING) => return Ok(pod),
            Some(POD_PHASE_FAILED) => {
                return Err(ClusterError::PodFailed {
                    name: pod.metadata.name.clone().unwrap_or_default(),
                    phase: POD_PHASE_FAILED.to_string(),
                }
                .into())
            }
            phase => debug!(pod = ?pod.metadata.name, ?phase, "Waiting for pod"),
        }
    }
    Err(ClusterError::Watch {
        message: "watch ended before a pod was running".to_string(),
    }
    .into())
}

fn keep_first_error(first: &mut Option<DevpushError>, result: Result<()>) {
    if let Err(err) = result {
        warn!(error = %err, "Delete step failed, continuing");
        if first.is_none() {
            *first = Some(err);
        }
    }
}

/// Applies desired component state through a [`ClusterClient`]
pub struct ComponentAdapter<C> {
    client: C,
    readiness_timeout: Duration,
}

impl<C: ClusterClient> ComponentAdapter<C> {
    pub fn new(client: C, readiness_timeout: Duration) -> Self {
        Self {
            client,
            readiness_timeout,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Create or update the component, then wait for a running pod
    #[instrument(skip(self, desired), fields(component = %desired.name))]
    pub async fn reconcile(&self, desired: &DesiredComponent) -> Result<ReconcileOutcome> {
        let selector = desired.selector();
        let live = self
            .client
            .list_deployments(&selector)
            .await?
            .into_iter()
            .find(|d| d.metadata.name.as_deref() == Some(desired.name.as_str()));

        self.ensure_claims(&desired.claims).await?;

        let action = match live {
            None => {
                self.create_component(desired).await?;
                ReconcileAction::Created
            }
            Some(live) => {
                self.update_component(desired, &live).await?;
                ReconcileAction::Updated
            }
        };

        let pod = self.wait_for_running_pod(&selector).await?;
        let pod = pod.metadata.name.unwrap_or_default();
        info!(?action, %pod, "Component is running");
        Ok(ReconcileOutcome { action, pod })
    }

    async fn ensure_claims(&self, claims: &[PersistentVolumeClaim]) -> Result<()> {
        for claim in claims {
            let name = claim.metadata.name.as_deref().unwrap_or_default();
            if self.client.get_pvc(name).await?.is_none() {
                debug!(claim = %name, "Creating volume claim");
                self.client.create_pvc(claim).await?;
            }
        }
        Ok(())
    }

    async fn create_component(&self, desired: &DesiredComponent) -> Result<()> {
        info!(component = %desired.name, "Creating component");
        self.client.create_deployment(&desired.deployment).await?;
        if let Some(service) = &desired.service {
            self.client.create_service(service).await?;
        }
        Ok(())
    }

    async fn update_component(&self, desired: &DesiredComponent, live: &Deployment) -> Result<()> {
        info!(component = %desired.name, "Updating component");
        let mut deployment = desired.deployment.clone();
        deployment.metadata.resource_version = live.metadata.resource_version.clone();
        self.client.replace_deployment(&deployment).await?;

        match (&desired.service, self.client.get_service(&desired.name).await?) {
            (Some(service), Some(live_service)) => {
                let mut service = service.clone();
                service.metadata.resource_version = live_service.metadata.resource_version;
                if let (Some(spec), Some(live_spec)) = (service.spec.as_mut(), live_service.spec) {
                    spec.cluster_ip = live_spec.cluster_ip;
                    spec.cluster_ips = live_spec.cluster_ips;
                }
                self.client.replace_service(&service).await?;
            }
            (Some(service), None) => {
                self.client.create_service(service).await?;
            }
            (None, Some(_)) => {
                debug!(component = %desired.name, "No exposed ports left, deleting service");
                self.client.delete_service(&desired.name).await?;
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// Wait until a pod matching `selector` is Running
    ///
    /// A Failed pod, a watch error or the timeout ends the wait with an
    /// error. Pods that are being deleted are ignored.
    #[instrument(skip(self))]
    pub async fn wait_for_running_pod(&self, selector: &str) -> Result<Pod> {
        let mut events = self.client.watch_pods(selector).await?;
        tokio::time::timeout(self.readiness_timeout, next_running_pod(&mut events))
            .await
            .map_err(|_| ClusterError::ReadinessTimeout {
                selector: selector.to_string(),
                timeout: self.readiness_timeout,
            })?
    }

    /// Delete a component's Deployment, Service and pods
    ///
    /// Every step is attempted; the first error is returned.
    #[instrument(skip(self, labels))]
    pub async fn delete(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let selector = label_selector(labels);
        let pods = self.client.list_pods(&selector).await?;
        if pods.is_empty() {
            return Err(ClusterError::ComponentNotFound {
                name: name.to_string(),
            }
            .into());
        }

        let mut first_error = None;
        keep_first_error(&mut first_error, self.client.delete_deployment(name).await);
        match self.client.delete_service(name).await {
            Err(err) if err.as_cluster().is_some_and(ClusterError::is_not_found) => {
                debug!(component = %name, "Component has no service");
            }
            result => keep_first_error(&mut first_error, result),
        }
        for pod in &pods {
            let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
            keep_first_error(&mut first_error, self.client.delete_pod(pod_name).await);
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!(component = %name, pods = pods.len(), "Deleted component");
                Ok(())
            }
        }
    }

    /// Render, reconcile, then run the component's commands in its pod
    ///
    /// Init and postStart commands run only when the component was created.
    /// Build always runs. Run (or debug) is started through the supervisor.
    #[instrument(skip(self, devfile, params))]
    pub async fn push(&self, devfile: &Devfile, params: &PushParameters) -> Result<PushOutcome> {
        let desired = render(devfile, params)?;
        let debug_command = if params.debug {
            resolve_debug_command(devfile, params.overrides.debug.as_deref())?
        } else {
            None
        };
        let post_start = expand_event_commands(devfile, LifecycleEvent::PostStart)?;

        let reconcile = self.reconcile(&desired).await?;
        let pod = reconcile.pod.clone();
        let shell = params.settings.shell.as_str();
        let created = reconcile.action == ReconcileAction::Created;

        let mut executed = Vec::new();
        if created {
            if let Some(init) = desired.commands.get(GroupKind::Init) {
                executed.extend(execute_command(&self.client, devfile, &pod, init, shell).await?);
            }
        }
        if let Some(build) = desired.commands.get(GroupKind::Build) {
            executed.extend(execute_command(&self.client, devfile, &pod, build, shell).await?);
        }

        let (program, command) = match (&debug_command, desired.commands.get(GroupKind::Run)) {
            (Some(debug_command), _) => (SupervisorProgram::Debug, Some(debug_command)),
            (None, run) => (SupervisorProgram::Run, run),
        };
        let mut started = None;
        if let Some(exec) = command.and_then(|c| c.as_exec()) {
            let supervised = desired
                .containers()
                .iter()
                .any(|c| c.name == exec.component && is_wrapped(c));
            if supervised {
                start_supervised(&self.client, &pod, &exec.component, program).await?;
                started = Some(program);
            }
        }
        if started.is_none() {
            warn!(%program, "Command is not supervised, nothing was started");
        }

        if created {
            for command in &post_start {
                executed.extend(execute_command(&self.client, devfile, &pod, command, shell).await?);
            }
        }

        Ok(PushOutcome {
            component: desired.name,
            reconcile,
            executed,
            started,
        })
    }
}
