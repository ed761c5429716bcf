//! Cluster client abstraction
//!
//! [`ClusterClient`] is the narrow set of cluster primitives the component
//! adapter needs: create/replace/delete for Deployments, Services and
//! claims, pod listing and watching, and exec with line-captured output.
//! A client is bound to one namespace.
//!
//! [`mock::MockCluster`] keeps all objects in memory and is used by the
//! tests; [`crate::kube_client::KubeClusterClient`] talks to a real cluster.

use crate::errors::Result;
use crate::io::LineWriter;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use tokio::sync::mpsc;

/// Stream of pod updates from a watch; closes when the watch ends
pub type PodEvents = mpsc::UnboundedReceiver<Result<Pod>>;

/// Pod phase reported while the containers run
pub const POD_PHASE_RUNNING: &str = "Running";
/// Pod phase reported after a terminal failure
pub const POD_PHASE_FAILED: &str = "Failed";

/// Phase of a pod, if reported
pub fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

/// Cluster client abstraction trait
#[allow(async_fn_in_trait)]
pub trait ClusterClient {
    /// List Deployments matching a label selector
    async fn list_deployments(&self, selector: &str) -> Result<Vec<Deployment>>;

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment>;

    /// Replace a Deployment; `metadata.resourceVersion` must be the live one
    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment>;

    async fn delete_deployment(&self, name: &str) -> Result<()>;

    async fn get_service(&self, name: &str) -> Result<Option<Service>>;

    async fn create_service(&self, service: &Service) -> Result<Service>;

    /// Replace a Service; `clusterIP` is immutable and must be carried over
    async fn replace_service(&self, service: &Service) -> Result<Service>;

    async fn delete_service(&self, name: &str) -> Result<()>;

    async fn get_pvc(&self, name: &str) -> Result<Option<PersistentVolumeClaim>>;

    async fn create_pvc(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim>;

    /// List Pods matching a label selector
    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>>;

    async fn delete_pod(&self, name: &str) -> Result<()>;

    /// Watch Pods matching a label selector
    ///
    /// Existing pods are delivered first, followed by every later change.
    async fn watch_pods(&self, selector: &str) -> Result<PodEvents>;

    /// Run `command` in a container, writing its stdout line by line
    ///
    /// The writer is closed when the command finishes. A non-zero exit is an
    /// error.
    async fn exec_in_container(
        &self,
        pod: &str,
        container: &str,
        command: &[String],
        stdout: LineWriter,
    ) -> Result<()>;
}

/// Check labels against a `k=v,k2` selector
pub fn matches_label_selector(
    labels: Option<&std::collections::BTreeMap<String, String>>,
    selector: &str,
) -> bool {
    for part in selector.split(',') {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some(labels) = labels else {
            return false;
        };
        if let Some((key, value)) = trimmed.split_once('=') {
            if labels.get(key.trim()).map(String::as_str) != Some(value.trim()) {
                return false;
            }
        } else if !labels.contains_key(trimmed) {
            return false;
        }
    }
    true
}

pub mod mock {
    //! In-memory cluster for testing reconcile and exec flows
    //!
    //! Objects live in ordered maps. Writes bump a resource version and reject
    //! stale ones with 409, Service replaces reject a changed `clusterIP`
    //! with 422, and every call is recorded. Any operation can be made to fail.
    //! Creating or replacing a Deployment schedules a pod which, by default,
    //! is reported Running.

    use super::{matches_label_selector, pod_phase, ClusterClient, PodEvents, POD_PHASE_RUNNING};
    use crate::errors::{ClusterError, Result};
    use crate::io::LineWriter;
    use indexmap::IndexMap;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::{
        PersistentVolumeClaim, Pod, PodStatus, Service,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::{BTreeMap, HashMap};
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use tracing::{debug, instrument};

    /// Cluster operations, used for failure injection and call history
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum MockOperation {
        ListDeployments,
        CreateDeployment,
        ReplaceDeployment,
        DeleteDeployment,
        GetService,
        CreateService,
        ReplaceService,
        DeleteService,
        GetPvc,
        CreatePvc,
        ListPods,
        DeletePod,
        WatchPods,
        Exec,
    }

    impl MockOperation {
        /// Whether the operation changes cluster state
        pub fn is_mutating(&self) -> bool {
            !matches!(
                self,
                MockOperation::ListDeployments
                    | MockOperation::GetService
                    | MockOperation::GetPvc
                    | MockOperation::ListPods
                    | MockOperation::WatchPods
            )
        }
    }

    /// Record of a call for verification in tests
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct MockCall {
        pub operation: MockOperation,
        /// Object name, label selector or `pod/container` for exec
        pub target: String,
        /// Command line for exec calls
        pub command: Vec<String>,
    }

    /// Canned output for an exec command
    #[derive(Debug, Clone, Default)]
    pub struct MockExecResponse {
        pub stdout: Vec<String>,
        pub exit_code: i32,
    }

    /// Configuration for the mock cluster
    #[derive(Debug, Clone)]
    pub struct MockClusterConfig {
        /// Phase given to pods scheduled for a Deployment; `None` schedules none
        pub scheduled_pod_phase: Option<String>,
        /// Responses keyed by the space-joined command line
        pub exec_responses: HashMap<String, MockExecResponse>,
        /// Operations that fail with the given message
        pub failures: HashMap<MockOperation, String>,
    }

    impl Default for MockClusterConfig {
        fn default() -> Self {
            Self {
                scheduled_pod_phase: Some(POD_PHASE_RUNNING.to_string()),
                exec_responses: HashMap::new(),
                failures: HashMap::new(),
            }
        }
    }

    #[derive(Debug, Default)]
    struct MockState {
        deployments: IndexMap<String, Deployment>,
        services: IndexMap<String, Service>,
        claims: IndexMap<String, PersistentVolumeClaim>,
        pods: IndexMap<String, Pod>,
        watchers: Vec<(String, mpsc::UnboundedSender<Result<Pod>>)>,
        next_version: u64,
        next_ip: u8,
        pod_counter: u64,
    }

    impl MockState {
        fn bump_version(&mut self) -> String {
            self.next_version += 1;
            self.next_version.to_string()
        }

        fn publish_pod(&mut self, pod: Pod) {
            let name = pod.metadata.name.clone().unwrap_or_default();
            self.watchers.retain(|(selector, tx)| {
                if matches_label_selector(pod.metadata.labels.as_ref(), selector) {
                    tx.send(Ok(pod.clone())).is_ok()
                } else {
                    !tx.is_closed()
                }
            });
            self.pods.insert(name, pod);
        }
    }

    /// In-memory cluster implementation
    #[derive(Debug, Clone, Default)]
    pub struct MockCluster {
        config: Arc<Mutex<MockClusterConfig>>,
        state: Arc<Mutex<MockState>>,
        history: Arc<Mutex<Vec<MockCall>>>,
    }

    impl MockCluster {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_config(config: MockClusterConfig) -> Self {
            Self {
                config: Arc::new(Mutex::new(config)),
                ..Default::default()
            }
        }

        /// Make `operation` fail with `message` until cleared
        pub fn fail_on(&self, operation: MockOperation, message: impl Into<String>) {
            let mut config = self.config.lock().unwrap();
            config.failures.insert(operation, message.into());
        }

        pub fn clear_failures(&self) {
            self.config.lock().unwrap().failures.clear();
        }

        /// Set the phase of pods scheduled from now on
        pub fn set_scheduled_pod_phase(&self, phase: Option<&str>) {
            self.config.lock().unwrap().scheduled_pod_phase = phase.map(str::to_string);
        }

        pub fn set_exec_response(&self, command: &[&str], response: MockExecResponse) {
            let mut config = self.config.lock().unwrap();
            config.exec_responses.insert(command.join(" "), response);
        }

        /// Add or update a pod, notifying matching watchers
        pub fn add_pod(&self, pod: Pod) {
            self.state.lock().unwrap().publish_pod(pod);
        }

        pub fn history(&self) -> Vec<MockCall> {
            self.history.lock().unwrap().clone()
        }

        pub fn calls_of(&self, operation: MockOperation) -> Vec<MockCall> {
            self.history()
                .into_iter()
                .filter(|call| call.operation == operation)
                .collect()
        }

        /// Exec calls as command lines, in call order
        pub fn exec_commands(&self) -> Vec<Vec<String>> {
            self.calls_of(MockOperation::Exec)
                .into_iter()
                .map(|call| call.command)
                .collect()
        }

        pub fn clear_history(&self) {
            self.history.lock().unwrap().clear();
        }

        pub fn deployment(&self, name: &str) -> Option<Deployment> {
            self.state.lock().unwrap().deployments.get(name).cloned()
        }

        pub fn service(&self, name: &str) -> Option<Service> {
            self.state.lock().unwrap().services.get(name).cloned()
        }

        pub fn claim(&self, name: &str) -> Option<PersistentVolumeClaim> {
            self.state.lock().unwrap().claims.get(name).cloned()
        }

        pub fn pods(&self) -> Vec<Pod> {
            self.state.lock().unwrap().pods.values().cloned().collect()
        }

        fn record(&self, operation: MockOperation, target: &str, command: &[String]) -> Result<()> {
            self.history.lock().unwrap().push(MockCall {
                operation,
                target: target.to_string(),
                command: command.to_vec(),
            });
            let config = self.config.lock().unwrap();
            match config.failures.get(&operation) {
                Some(message) => {
                    debug!(?operation, %target, "Injecting failure");
                    Err(ClusterError::Injected(message.clone()).into())
                }
                None => Ok(()),
            }
        }

        /// Replace the component's pods with a freshly scheduled one
        fn schedule_pod(&self, state: &mut MockState, deployment: &Deployment) {
            let Some(phase) = self.config.lock().unwrap().scheduled_pod_phase.clone() else {
                return;
            };
            let labels = deployment
                .spec
                .as_ref()
                .and_then(|spec| spec.template.metadata.as_ref())
                .and_then(|meta| meta.labels.clone())
                .unwrap_or_default();
            let owner = deployment.metadata.name.clone().unwrap_or_default();

            state
                .pods
                .retain(|name, _| !name.starts_with(&format!("{}-", owner)));
            state.pod_counter += 1;
            let pod = Pod {
                metadata: ObjectMeta {
                    name: Some(format!("{}-{}", owner, state.pod_counter)),
                    labels: Some(labels),
                    ..Default::default()
                },
                status: Some(PodStatus {
                    phase: Some(phase),
                    ..Default::default()
                }),
                ..Default::default()
            };
            state.publish_pod(pod);
        }
    }

    fn object_name(meta: &ObjectMeta) -> String {
        meta.name.clone().unwrap_or_default()
    }

    fn not_found(kind: &str, name: &str) -> crate::errors::DevpushError {
        ClusterError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
        .into()
    }

    fn api_error(code: u16, message: String) -> crate::errors::DevpushError {
        ClusterError::Api { code, message }.into()
    }

    fn check_version(kind: &str, name: &str, live: Option<&String>, sent: Option<&String>) -> Result<()> {
        if live != sent {
            return Err(api_error(
                409,
                format!(
                    "Operation cannot be fulfilled on {} \"{}\": the object has been modified",
                    kind, name
                ),
            ));
        }
        Ok(())
    }

    #[allow(async_fn_in_trait)]
    impl ClusterClient for MockCluster {
        #[instrument(skip(self))]
        async fn list_deployments(&self, selector: &str) -> Result<Vec<Deployment>> {
            self.record(MockOperation::ListDeployments, selector, &[])?;
            let state = self.state.lock().unwrap();
            Ok(state
                .deployments
                .values()
                .filter(|d| matches_label_selector(d.metadata.labels.as_ref(), selector))
                .cloned()
                .collect())
        }

        async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
            let name = object_name(&deployment.metadata);
            self.record(MockOperation::CreateDeployment, &name, &[])?;
            let mut state = self.state.lock().unwrap();
            if state.deployments.contains_key(&name) {
                return Err(api_error(
                    409,
                    format!("deployments.apps \"{}\" already exists", name),
                ));
            }
            let mut created = deployment.clone();
            created.metadata.resource_version = Some(state.bump_version());
            state.deployments.insert(name, created.clone());
            self.schedule_pod(&mut state, &created);
            Ok(created)
        }

        async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
            let name = object_name(&deployment.metadata);
            self.record(MockOperation::ReplaceDeployment, &name, &[])?;
            let mut state = self.state.lock().unwrap();
            let live = state
                .deployments
                .get(&name)
                .ok_or_else(|| not_found("Deployment", &name))?;
            check_version(
                "deployments.apps",
                &name,
                live.metadata.resource_version.as_ref(),
                deployment.metadata.resource_version.as_ref(),
            )?;
            let mut replaced = deployment.clone();
            replaced.metadata.resource_version = Some(state.bump_version());
            state.deployments.insert(name, replaced.clone());
            self.schedule_pod(&mut state, &replaced);
            Ok(replaced)
        }

        async fn delete_deployment(&self, name: &str) -> Result<()> {
            self.record(MockOperation::DeleteDeployment, name, &[])?;
            let mut state = self.state.lock().unwrap();
            state
                .deployments
                .shift_remove(name)
                .map(|_| ())
                .ok_or_else(|| not_found("Deployment", name))
        }

        async fn get_service(&self, name: &str) -> Result<Option<Service>> {
            self.record(MockOperation::GetService, name, &[])?;
            Ok(self.state.lock().unwrap().services.get(name).cloned())
        }

        async fn create_service(&self, service: &Service) -> Result<Service> {
            let name = object_name(&service.metadata);
            self.record(MockOperation::CreateService, &name, &[])?;
            let mut state = self.state.lock().unwrap();
            if state.services.contains_key(&name) {
                return Err(api_error(
                    409,
                    format!("services \"{}\" already exists", name),
                ));
            }
            state.next_ip = state.next_ip.wrapping_add(1);
            let ip = format!("10.96.0.{}", state.next_ip);
            let mut created = service.clone();
            created.metadata.resource_version = Some(state.bump_version());
            let spec = created.spec.get_or_insert_with(Default::default);
            spec.cluster_ip = Some(ip.clone());
            spec.cluster_ips = Some(vec![ip]);
            state.services.insert(name, created.clone());
            Ok(created)
        }

        async fn replace_service(&self, service: &Service) -> Result<Service> {
            let name = object_name(&service.metadata);
            self.record(MockOperation::ReplaceService, &name, &[])?;
            let mut state = self.state.lock().unwrap();
            let live = state
                .services
                .get(&name)
                .ok_or_else(|| not_found("Service", &name))?;
            check_version(
                "services",
                &name,
                live.metadata.resource_version.as_ref(),
                service.metadata.resource_version.as_ref(),
            )?;
            let live_ip = live.spec.as_ref().and_then(|s| s.cluster_ip.clone());
            let sent_ip = service.spec.as_ref().and_then(|s| s.cluster_ip.clone());
            if live_ip != sent_ip {
                return Err(api_error(
                    422,
                    format!(
                        "Service \"{}\" is invalid: spec.clusterIP: Invalid value: {:?}: field is immutable",
                        name, sent_ip
                    ),
                ));
            }
            let mut replaced = service.clone();
            replaced.metadata.resource_version = Some(state.bump_version());
            state.services.insert(name, replaced.clone());
            Ok(replaced)
        }

        async fn delete_service(&self, name: &str) -> Result<()> {
            self.record(MockOperation::DeleteService, name, &[])?;
            let mut state = self.state.lock().unwrap();
            state
                .services
                .shift_remove(name)
                .map(|_| ())
                .ok_or_else(|| not_found("Service", name))
        }

        async fn get_pvc(&self, name: &str) -> Result<Option<PersistentVolumeClaim>> {
            self.record(MockOperation::GetPvc, name, &[])?;
            Ok(self.state.lock().unwrap().claims.get(name).cloned())
        }

        async fn create_pvc(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
            let name = object_name(&claim.metadata);
            self.record(MockOperation::CreatePvc, &name, &[])?;
            let mut state = self.state.lock().unwrap();
            if state.claims.contains_key(&name) {
                return Err(api_error(
                    409,
                    format!("persistentvolumeclaims \"{}\" already exists", name),
                ));
            }
            let mut created = claim.clone();
            created.metadata.resource_version = Some(state.bump_version());
            state.claims.insert(name, created.clone());
            Ok(created)
        }

        async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>> {
            self.record(MockOperation::ListPods, selector, &[])?;
            let state = self.state.lock().unwrap();
            Ok(state
                .pods
                .values()
                .filter(|p| matches_label_selector(p.metadata.labels.as_ref(), selector))
                .cloned()
                .collect())
        }

        async fn delete_pod(&self, name: &str) -> Result<()> {
            self.record(MockOperation::DeletePod, name, &[])?;
            let mut state = self.state.lock().unwrap();
            state
                .pods
                .shift_remove(name)
                .map(|_| ())
                .ok_or_else(|| not_found("Pod", name))
        }

        async fn watch_pods(&self, selector: &str) -> Result<PodEvents> {
            self.record(MockOperation::WatchPods, selector, &[])?;
            let (tx, rx) = mpsc::unbounded_channel();
            let mut state = self.state.lock().unwrap();
            for pod in state.pods.values() {
                if matches_label_selector(pod.metadata.labels.as_ref(), selector) {
                    debug!(pod = ?pod.metadata.name, phase = ?pod_phase(pod), "Replaying pod");
                    let _ = tx.send(Ok(pod.clone()));
                }
            }
            state.watchers.push((selector.to_string(), tx));
            Ok(rx)
        }

        async fn exec_in_container(
            &self,
            pod: &str,
            container: &str,
            command: &[String],
            mut stdout: LineWriter,
        ) -> Result<()> {
            let target = format!("{}/{}", pod, container);
            self.record(MockOperation::Exec, &target, command)?;
            if !self.state.lock().unwrap().pods.contains_key(pod) {
                return Err(not_found("Pod", pod));
            }

            let response = self
                .config
                .lock()
                .unwrap()
                .exec_responses
                .get(&command.join(" "))
                .cloned()
                .unwrap_or_default();
            for line in &response.stdout {
                writeln!(stdout, "{}", line).map_err(|e| ClusterError::Exec {
                    container: container.to_string(),
                    message: e.to_string(),
                })?;
            }
            stdout.close();

            if response.exit_code != 0 {
                return Err(ClusterError::Exec {
                    container: container.to_string(),
                    message: format!("command exited with code {}", response.exit_code),
                }
                .into());
            }
            Ok(())
        }
    }

    /// Pod with the given name, labels and phase
    pub fn pod(name: &str, labels: &BTreeMap<String, String>, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
