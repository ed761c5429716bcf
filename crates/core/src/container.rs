//! Container synthesis and component identity
//!
//! Converts devfile container components into Kubernetes container
//! specifications: image, entrypoint, environment, ports, resource limits and
//! the shared source volume. Also defines the labels that identify the
//! cluster objects belonging to a component.

use crate::devfile::{ContainerComponent, Devfile, Endpoint, EnvVar};
use crate::errors::{Result, SynthesisError};
use crate::naming::{hashed_name, truncate_name, MAX_NAME_LENGTH};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar as K8sEnvVar, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, ResourceRequirements, SecurityContext, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

/// Label schema for component identification
pub const LABEL_COMPONENT: &str = "component";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] on objects created by devpush
pub const DEVPUSH_MANAGER: &str = "devpush";

/// Shared volume holding the project sources
pub const PROJECTS_VOLUME_NAME: &str = "odo-projects";

/// Source mount path used when a component sets no `sourceMapping`
pub const DEFAULT_PROJECTS_MOUNT_PATH: &str = "/projects";

pub const ENV_PROJECTS_ROOT: &str = "PROJECTS_ROOT";
pub const ENV_PROJECT_SOURCE: &str = "PROJECT_SOURCE";

/// Claim size for volume components that do not declare one
pub const DEFAULT_VOLUME_SIZE: &str = "1Gi";

static QUANTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+|[numkMGTPE]|Ki|Mi|Gi|Ti|Pi|Ei)?$")
        .expect("quantity pattern is valid")
});

/// Labels attached to every object of a component
pub fn component_labels(component_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_COMPONENT.to_string(), component_name.to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), DEVPUSH_MANAGER.to_string());
    labels
}

/// Render labels as a `k=v,k=v` selector in key order
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a Kubernetes quantity such as `512Mi` or `1.5G`
///
/// Returns `None` for empty or malformed values.
pub fn parse_quantity(value: &str) -> Option<Quantity> {
    let value = value.trim();
    if value.is_empty() || !QUANTITY_RE.is_match(value) {
        return None;
    }
    Some(Quantity(value.to_string()))
}

/// Resource requirements for an optional memory limit
///
/// Absent or unparsable limits yield empty requirements.
pub fn convert_resources(memory_limit: Option<&str>) -> ResourceRequirements {
    let Some(raw) = memory_limit else {
        return ResourceRequirements::default();
    };
    match parse_quantity(raw) {
        Some(quantity) => {
            let mut limits = BTreeMap::new();
            limits.insert("memory".to_string(), quantity);
            ResourceRequirements {
                limits: Some(limits),
                ..Default::default()
            }
        }
        None => {
            if !raw.trim().is_empty() {
                warn!(memory_limit = %raw, "Ignoring unparsable memory limit");
            }
            ResourceRequirements::default()
        }
    }
}

pub fn convert_env(env: &[EnvVar]) -> Vec<K8sEnvVar> {
    env.iter()
        .map(|var| K8sEnvVar {
            name: var.name.clone(),
            value: Some(var.value.clone()),
            ..Default::default()
        })
        .collect()
}

/// One named container port per endpoint, without de-duplication
pub fn convert_ports(endpoints: &[Endpoint]) -> Vec<ContainerPort> {
    endpoints
        .iter()
        .map(|endpoint| ContainerPort {
            name: Some(truncate_name(&endpoint.name, 15)),
            container_port: endpoint.target_port,
            protocol: Some(endpoint.protocol.transport().to_string()),
            ..Default::default()
        })
        .collect()
}

/// Whether a container already declares an environment variable
pub fn has_env(container: &Container, name: &str) -> bool {
    container
        .env
        .as_ref()
        .map(|env| env.iter().any(|var| var.name == name))
        .unwrap_or(false)
}

/// Append an environment variable unless the container already declares it
pub fn add_env_if_absent(container: &mut Container, name: &str, value: &str) {
    if has_env(container, name) {
        debug!(container = %container.name, env = %name, "Keeping devfile-provided variable");
        return;
    }
    container.env.get_or_insert_with(Vec::new).push(K8sEnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    });
}

pub fn add_volume_mount(container: &mut Container, name: &str, mount_path: &str) {
    container
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(VolumeMount {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            ..Default::default()
        });
}

/// Build the container specs for every container component, in order
#[instrument(skip(devfile))]
pub fn synthesize_containers(devfile: &Devfile) -> Result<Vec<Container>> {
    let containers = devfile
        .containers()
        .map(|(name, component)| convert_container(devfile, name, component))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    debug!(count = containers.len(), "Synthesized containers");
    Ok(containers)
}

fn convert_container(
    devfile: &Devfile,
    name: &str,
    component: &ContainerComponent,
) -> std::result::Result<Container, SynthesisError> {
    let ports = convert_ports(&component.endpoints);
    let mut container = Container {
        name: name.to_string(),
        image: Some(component.image.clone()),
        command: non_empty(component.command.clone()),
        args: non_empty(component.args.clone()),
        env: non_empty(convert_env(&component.env)),
        ports: non_empty(ports),
        resources: Some(convert_resources(component.memory_limit.as_deref())),
        security_context: Some(SecurityContext {
            privileged: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    };

    if component.mounts_sources() {
        let mount_path = component
            .source_mapping
            .as_deref()
            .filter(|path| !path.is_empty())
            .unwrap_or(DEFAULT_PROJECTS_MOUNT_PATH)
            .to_string();
        let project_source = match devfile.projects.first() {
            Some(project) => format!("{}/{}", mount_path, project.source_dir()),
            None => mount_path.clone(),
        };

        add_volume_mount(&mut container, PROJECTS_VOLUME_NAME, &mount_path);
        add_env_if_absent(&mut container, ENV_PROJECTS_ROOT, &mount_path);
        add_env_if_absent(&mut container, ENV_PROJECT_SOURCE, &project_source);
    }

    for mount in &component.volume_mounts {
        if devfile.volumes().all(|(volume, _)| volume != mount.name) {
            return Err(SynthesisError::UnknownVolume {
                container: name.to_string(),
                volume: mount.name.clone(),
            });
        }
        let path = mount
            .path
            .clone()
            .unwrap_or_else(|| format!("/{}", mount.name));
        add_volume_mount(&mut container, &mount.name, &path);
    }

    Ok(container)
}

/// Name of the claim backing a devfile volume
///
/// Over-long names get a hash suffix of the full name, so volumes of a
/// component with a long name still map to distinct claims.
pub fn volume_claim_name(component_name: &str, volume_name: &str) -> String {
    let full = format!("{}-{}", component_name, volume_name);
    if full.chars().count() > MAX_NAME_LENGTH {
        hashed_name(&full, MAX_NAME_LENGTH)
    } else {
        full
    }
}

/// One claim per devfile volume component
pub fn synthesize_volume_claims(
    devfile: &Devfile,
    component_name: &str,
    labels: &BTreeMap<String, String>,
) -> Result<Vec<PersistentVolumeClaim>> {
    let mut claims = Vec::new();
    for (volume, spec) in devfile.volumes() {
        let size = spec.size.as_deref().unwrap_or(DEFAULT_VOLUME_SIZE);
        let quantity = parse_quantity(size).ok_or_else(|| SynthesisError::InvalidQuantity {
            field: format!("volume {} size", volume),
            value: size.to_string(),
        })?;

        let mut requests = BTreeMap::new();
        requests.insert("storage".to_string(), quantity);

        claims.push(PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(volume_claim_name(component_name, volume)),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    Ok(claims)
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}
