//! Delete command implementation
//!
//! Implements `devpush delete`: removes the component's Deployment, Service
//! and pods. Volume claims are kept.

use crate::commands::shared::write_json;
use anyhow::Result;
use devpush_core::component::{normalize_component_name, ComponentAdapter};
use devpush_core::config::PushSettings;
use devpush_core::container::component_labels;
use devpush_core::devfile::Devfile;
use devpush_core::kube_client::KubeClusterClient;
use serde::Serialize;
use std::path::PathBuf;
use tracing::instrument;

/// Delete command arguments
#[derive(Debug, Clone)]
pub struct DeleteArgs {
    pub devfile: PathBuf,
    pub settings: Option<PathBuf>,
    pub namespace: Option<String>,
    /// Component name; read from the devfile when absent
    pub name: Option<String>,
}

/// Stdout contract of `devpush delete`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub component: String,
    pub namespace: String,
}

/// Component name from the flag, or from the devfile when no flag is given
pub fn target_name(args: &DeleteArgs) -> Result<String> {
    let raw = match &args.name {
        Some(name) => name.clone(),
        None => Devfile::load_from_path(&args.devfile)?
            .component_name()
            .to_string(),
    };
    Ok(normalize_component_name(&raw))
}

/// Execute the delete command
#[instrument(skip(args))]
pub async fn execute_delete(args: DeleteArgs) -> Result<()> {
    let name = target_name(&args)?;
    let mut settings = PushSettings::load(args.settings.as_deref())?;
    if let Some(namespace) = &args.namespace {
        settings.namespace = namespace.clone();
        settings.validate()?;
    }

    let client = KubeClusterClient::connect(&settings.namespace).await?;
    let adapter = ComponentAdapter::new(client, settings.readiness_timeout());
    adapter.delete(&name, &component_labels(&name)).await?;

    write_json(&DeleteResult {
        component: name,
        namespace: settings.namespace,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_target_name_from_flag_skips_devfile() {
        let args = DeleteArgs {
            devfile: PathBuf::from("/nonexistent/devfile.yaml"),
            settings: None,
            namespace: None,
            name: Some("My-App".to_string()),
        };
        assert_eq!(target_name(&args).unwrap(), "my-app");
    }

    #[test]
    fn test_target_name_from_devfile() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("devfile.yaml");
        fs::write(&path, "metadata:\n  name: api\n").unwrap();
        let args = DeleteArgs {
            devfile: path,
            settings: None,
            namespace: None,
            name: None,
        };
        assert_eq!(target_name(&args).unwrap(), "api");
    }
}
