//! Resolve command implementation
//!
//! Implements `devpush resolve`: validates every devfile command, then prints
//! the commands a push would run for each group as JSON.

use crate::commands::shared::write_json;
use anyhow::Result;
use devpush_core::command::{
    resolve_debug_command, resolve_push_command_set, resolve_test_command,
    validate_devfile_commands, CommandMap, CommandOverrides, PUSH_GROUPS,
};
use devpush_core::devfile::{Command, Devfile, GroupKind};
use devpush_core::errors::{CommandError, DevpushError};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, instrument};

/// Resolve command arguments
#[derive(Debug, Clone)]
pub struct ResolveArgs {
    pub devfile: PathBuf,
    pub overrides: CommandOverrides,
    /// Also resolve the debug group
    pub debug: bool,
    /// Also resolve the test group
    pub test: bool,
}

/// Stdout contract of `devpush resolve`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResult {
    pub commands: CommandMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<Command>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<Command>,
}

/// Resolve the command set of a devfile
pub fn resolve(devfile: &Devfile, args: &ResolveArgs) -> Result<ResolveResult, DevpushError> {
    let mut groups = PUSH_GROUPS.to_vec();
    if args.debug {
        groups.push(GroupKind::Debug);
    }
    if args.test {
        groups.push(GroupKind::Test);
    }
    let problems = validate_devfile_commands(devfile, &groups);
    if !problems.is_empty() {
        return Err(CommandError::Aggregate {
            messages: problems.iter().map(ToString::to_string).collect(),
        }
        .into());
    }

    let commands = resolve_push_command_set(devfile, &args.overrides)?;
    let debug = if args.debug {
        resolve_debug_command(devfile, args.overrides.debug.as_deref())?
    } else {
        None
    };
    let test = if args.test {
        Some(resolve_test_command(
            devfile,
            args.overrides.test.as_deref(),
        )?)
    } else {
        None
    };

    Ok(ResolveResult {
        commands,
        debug,
        test,
    })
}

/// Execute the resolve command
#[instrument(skip(args), fields(devfile = %args.devfile.display()))]
pub async fn execute_resolve(args: ResolveArgs) -> Result<()> {
    let devfile = Devfile::load_from_path(&args.devfile)?;
    let result = resolve(&devfile, &args)?;
    debug!(groups = result.commands.len(), "Resolved commands");
    write_json(&result)
}
