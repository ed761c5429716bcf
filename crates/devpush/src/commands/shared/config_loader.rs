//! Shared devfile and settings loading for CLI commands.
//!
//! Every subcommand reads the devfile the same way and resolves settings in
//! the same order: defaults, settings file, `DEVPUSH_*` environment, then the
//! `--namespace` flag.

use devpush_core::command::CommandOverrides;
use devpush_core::component::PushParameters;
use devpush_core::config::PushSettings;
use devpush_core::devfile::Devfile;
use devpush_core::errors::Result;
use std::path::Path;
use tracing::debug;

/// Component selection shared by render and push
#[derive(Debug, Clone, Default)]
pub struct ComponentOptions {
    pub name: Option<String>,
    pub overrides: CommandOverrides,
    pub debug: bool,
    pub debug_port: Option<i32>,
}

/// Inputs for loading a push context.
pub struct LoadArgs<'a> {
    pub devfile: &'a Path,
    pub settings: Option<&'a Path>,
    pub namespace: Option<&'a str>,
}

/// Loaded devfile and settings.
#[derive(Debug)]
pub struct LoadResult {
    pub devfile: Devfile,
    pub settings: PushSettings,
}

impl LoadResult {
    /// Push parameters for this devfile and the given component options
    pub fn parameters(&self, options: ComponentOptions) -> PushParameters {
        PushParameters {
            component_name: options.name,
            overrides: options.overrides,
            debug: options.debug,
            debug_port: options.debug_port,
            settings: self.settings.clone(),
        }
    }
}

/// Load the devfile and resolve settings.
pub fn load(args: LoadArgs<'_>) -> Result<LoadResult> {
    let devfile = Devfile::load_from_path(args.devfile)?;
    let mut settings = PushSettings::load(args.settings)?;
    if let Some(namespace) = args.namespace {
        settings.namespace = namespace.to_string();
        settings.validate()?;
    }
    debug!(
        devfile = %args.devfile.display(),
        namespace = %settings.namespace,
        "Loaded push context"
    );

    Ok(LoadResult {
        devfile,
        settings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const DEVFILE: &str = r#"
schemaVersion: 2.0.0
metadata:
  name: web
components:
  - name: runtime
    container:
      image: node:18
commands:
  - id: run
    exec:
      component: runtime
      commandLine: npm start
      group:
        kind: run
"#;

    #[test]
    fn test_load_with_namespace_flag() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("devfile.yaml");
        fs::write(&path, DEVFILE).unwrap();

        let loaded = load(LoadArgs {
            devfile: &path,
            settings: None,
            namespace: Some("team-a"),
        })
        .unwrap();
        assert_eq!(loaded.settings.namespace, "team-a");
        assert_eq!(loaded.devfile.component_name(), "web");

        let params = loaded.parameters(ComponentOptions {
            debug_port: Some(9229),
            ..Default::default()
        });
        assert_eq!(params.debug_port(), 9229);
    }

    #[test]
    fn test_load_rejects_empty_namespace() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("devfile.yaml");
        fs::write(&path, DEVFILE).unwrap();

        let err = load(LoadArgs {
            devfile: &path,
            settings: None,
            namespace: Some(" "),
        })
        .unwrap_err();
        assert!(err.to_string().contains("namespace must not be empty"));
    }

    #[test]
    fn test_load_missing_devfile() {
        let temp_dir = TempDir::new().unwrap();
        let err = load(LoadArgs {
            devfile: &temp_dir.path().join("devfile.yaml"),
            settings: None,
            namespace: None,
        })
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
