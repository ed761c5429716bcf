//! Render command implementation
//!
//! Implements `devpush render`: computes the objects a push would apply and
//! prints them in apply order. Nothing is sent to the cluster.

use crate::cli::ManifestFormat;
use crate::commands::shared::output::write_yaml_documents;
use crate::commands::shared::{load, write_json, ComponentOptions, LoadArgs};
use anyhow::Result;
use devpush_core::component::render;
use std::path::PathBuf;
use tracing::{info, instrument};

/// Render command arguments
#[derive(Debug, Clone)]
pub struct RenderArgs {
    pub devfile: PathBuf,
    pub settings: Option<PathBuf>,
    pub namespace: Option<String>,
    pub component: ComponentOptions,
    pub output: ManifestFormat,
}

/// Execute the render command
#[instrument(skip(args), fields(devfile = %args.devfile.display()))]
pub async fn execute_render(args: RenderArgs) -> Result<()> {
    let loaded = load(LoadArgs {
        devfile: &args.devfile,
        settings: args.settings.as_deref(),
        namespace: args.namespace.as_deref(),
    })?;
    let params = loaded.parameters(args.component);
    let desired = render(&loaded.devfile, &params)?;
    let manifests = desired.manifests()?;
    info!(
        component = %desired.name,
        objects = manifests.len(),
        "Rendered component"
    );

    match args.output {
        ManifestFormat::Json => write_json(&manifests),
        ManifestFormat::Yaml => write_yaml_documents(&manifests),
    }
}
