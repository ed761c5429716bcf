//! Kubernetes-backed cluster client
//!
//! Implements [`ClusterClient`] over `kube`'s typed `Api` handles, all bound
//! to one namespace. Pod watches run `kube::runtime::watcher` on a spawned
//! task feeding a channel; exec attaches over a websocket and pumps stdout
//! into the caller's [`LineWriter`].

use crate::cluster::{ClusterClient, PodEvents};
use crate::errors::{ClusterError, DevpushError, Result};
use crate::io::LineWriter;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use kube::api::{Api, AttachParams, DeleteParams, ListParams, PostParams};
use kube::runtime::watcher::{self, watcher};
use kube::runtime::WatchStreamExt;
use kube::Client;
use std::io::Write;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

/// Cluster client for one namespace
#[derive(Clone)]
pub struct KubeClusterClient {
    namespace: String,
    deployments: Api<Deployment>,
    services: Api<Service>,
    claims: Api<PersistentVolumeClaim>,
    pods: Api<Pod>,
}

impl KubeClusterClient {
    /// Connect using the ambient kubeconfig or in-cluster configuration
    #[instrument]
    pub async fn connect(namespace: &str) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Client(e.to_string()))?;
        Ok(Self::new(client, namespace))
    }

    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            deployments: Api::namespaced(client.clone(), namespace),
            services: Api::namespaced(client.clone(), namespace),
            claims: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client, namespace),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

fn object_name(meta: &kube::api::ObjectMeta) -> &str {
    meta.name.as_deref().unwrap_or_default()
}

/// Map a 404 to [`ClusterError::NotFound`], anything else through `From`
fn map_kube_error(kind: &str, name: &str) -> impl FnOnce(kube::Error) -> DevpushError {
    let kind = kind.to_string();
    let name = name.to_string();
    move |err| match err {
        kube::Error::Api(ae) if ae.code == 404 => ClusterError::NotFound { kind, name }.into(),
        other => other.into(),
    }
}

#[allow(async_fn_in_trait)]
impl ClusterClient for KubeClusterClient {
    #[instrument(skip(self))]
    async fn list_deployments(&self, selector: &str) -> Result<Vec<Deployment>> {
        let list = self
            .deployments
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(list.items)
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let name = object_name(&deployment.metadata);
        debug!(%name, "Creating deployment");
        Ok(self
            .deployments
            .create(&PostParams::default(), deployment)
            .await?)
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let name = object_name(&deployment.metadata);
        debug!(%name, "Replacing deployment");
        self.deployments
            .replace(name, &PostParams::default(), deployment)
            .await
            .map_err(map_kube_error("Deployment", name))
    }

    async fn delete_deployment(&self, name: &str) -> Result<()> {
        self.deployments
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(map_kube_error("Deployment", name))
    }

    async fn get_service(&self, name: &str) -> Result<Option<Service>> {
        Ok(self.services.get_opt(name).await?)
    }

    async fn create_service(&self, service: &Service) -> Result<Service> {
        Ok(self.services.create(&PostParams::default(), service).await?)
    }

    async fn replace_service(&self, service: &Service) -> Result<Service> {
        let name = object_name(&service.metadata);
        self.services
            .replace(name, &PostParams::default(), service)
            .await
            .map_err(map_kube_error("Service", name))
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        self.services
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(map_kube_error("Service", name))
    }

    async fn get_pvc(&self, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        Ok(self.claims.get_opt(name).await?)
    }

    async fn create_pvc(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        Ok(self.claims.create(&PostParams::default(), claim).await?)
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>> {
        let list = self
            .pods
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(list.items)
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        self.pods
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(map_kube_error("Pod", name))
    }

    #[instrument(skip(self))]
    async fn watch_pods(&self, selector: &str) -> Result<PodEvents> {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = watcher::Config::default().labels(selector);
        let stream = watcher(self.pods.clone(), config).applied_objects();

        tokio::spawn(async move {
            let mut stream = stream.boxed();
            while let Some(item) = stream.next().await {
                let item = item.map_err(|e| {
                    ClusterError::Watch {
                        message: e.to_string(),
                    }
                    .into()
                });
                if tx.send(item).is_err() {
                    debug!("Pod watch receiver dropped, stopping watch");
                    break;
                }
            }
        });

        Ok(rx)
    }

    #[instrument(skip(self, stdout))]
    async fn exec_in_container(
        &self,
        pod: &str,
        container: &str,
        command: &[String],
        mut stdout: LineWriter,
    ) -> Result<()> {
        let exec_error = |message: String| -> DevpushError {
            ClusterError::Exec {
                container: container.to_string(),
                message,
            }
            .into()
        };

        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(false);
        let mut attached = self
            .pods
            .exec(pod, command.to_vec(), &params)
            .await
            .map_err(map_kube_error("Pod", pod))?;

        if let Some(mut reader) = attached.stdout() {
            let mut buf = [0u8; 8192];
            loop {
                let n = reader
                    .read(&mut buf)
                    .await
                    .map_err(|e| exec_error(e.to_string()))?;
                if n == 0 {
                    break;
                }
                stdout
                    .write_all(&buf[..n])
                    .map_err(|e| exec_error(e.to_string()))?;
            }
        }
        stdout.close();

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        if let Err(e) = attached.join().await {
            warn!(error = %e, "Exec session did not shut down cleanly");
        }

        match status {
            Some(status) if status.status.as_deref() != Some("Success") => {
                Err(exec_error(status.message.unwrap_or_else(|| {
                    "command failed without a message".to_string()
                })))
            }
            _ => Ok(()),
        }
    }
}
