//! Lifecycle event expansion
//!
//! `preStart` commands run once, before the component's containers start, as
//! init containers. Each event id names an exec command or a composite
//! command; composites are spliced in place one level deep.
//!
//! `postStart` commands are expanded the same way but run inside the
//! running pod after the run command starts (see [`crate::exec`]).

use crate::devfile::{Command, CommandKind, Devfile};
use crate::entrypoint::BOOTSTRAP_INIT_CONTAINER_NAME;
use crate::errors::{Result, SynthesisError};
use crate::naming::NameAllocator;
use k8s_openapi::api::core::v1::Container;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Shell used to run init container commands when none is configured
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Devfile lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleEvent {
    /// Before the component containers start
    PreStart,
    /// After the run command starts
    PostStart,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::PreStart => "preStart",
            LifecycleEvent::PostStart => "postStart",
        }
    }

    /// Command ids bound to this event, in declaration order
    pub fn command_ids<'a>(&self, devfile: &'a Devfile) -> &'a [String] {
        match self {
            LifecycleEvent::PreStart => &devfile.events.pre_start,
            LifecycleEvent::PostStart => &devfile.events.post_start,
        }
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expand an event into exec commands, splicing composites one level deep
#[instrument(level = "debug", skip(devfile))]
pub fn expand_event_commands(devfile: &Devfile, event: LifecycleEvent) -> Result<Vec<Command>> {
    let index: HashMap<String, &Command> = devfile
        .commands
        .iter()
        .map(|c| (c.id.to_lowercase(), c))
        .collect();

    let mut commands = Vec::new();
    for id in event.command_ids(devfile) {
        let command = lookup(&index, id)?;
        match &command.kind {
            CommandKind::Exec(_) => commands.push(command.clone()),
            CommandKind::Composite(composite) => {
                for sub_id in &composite.commands {
                    let sub = lookup(&index, sub_id)?;
                    if sub.as_composite().is_some() {
                        return Err(SynthesisError::NestedComposite {
                            id: command.id.clone(),
                            sub_id: sub.id.clone(),
                        }
                        .into());
                    }
                    commands.push(sub.clone());
                }
            }
        }
    }
    debug!(%event, count = commands.len(), "Expanded event commands");
    Ok(commands)
}

fn lookup<'a>(
    index: &HashMap<String, &'a Command>,
    id: &str,
) -> std::result::Result<&'a Command, SynthesisError> {
    index
        .get(&id.to_lowercase())
        .copied()
        .ok_or_else(|| SynthesisError::UnsupportedEvent { id: id.to_string() })
}

/// Shell command line, prefixed with `cd <dir> && ` when a working dir is set
pub fn shell_command_line(command_line: &str, working_dir: Option<&str>) -> String {
    match working_dir.filter(|dir| !dir.is_empty()) {
        Some(dir) => format!("cd {} && {}", dir, command_line),
        None => command_line.to_string(),
    }
}

/// One init container per `preStart` exec command, in event order
///
/// Each init container is a copy of the container hosting the command, with
/// its entrypoint replaced by `shell -c <command line>`, no ports, and the
/// command's environment appended. Names are `<component>-<command id>` in
/// lowercase, bounded to a DNS label and unique within the pod.
#[instrument(skip(devfile, containers))]
pub fn build_prestart_init_containers(
    devfile: &Devfile,
    containers: &[Container],
    shell: &str,
) -> Result<Vec<Container>> {
    let commands = expand_event_commands(devfile, LifecycleEvent::PreStart)?;

    let mut names = NameAllocator::new();
    names.reserve(BOOTSTRAP_INIT_CONTAINER_NAME);
    for container in containers {
        names.reserve(container.name.clone());
    }

    let mut init_containers = Vec::with_capacity(commands.len());
    for command in &commands {
        let Some(exec) = command.as_exec() else {
            return Err(SynthesisError::UnsupportedEvent {
                id: command.id.clone(),
            }
            .into());
        };

        let base = containers
            .iter()
            .find(|c| c.name == exec.component)
            .ok_or_else(|| SynthesisError::UnknownComponent {
                command: command.id.clone(),
                component: exec.component.clone(),
            })?;

        let mut init = base.clone();
        let full_name = format!("{}-{}", exec.component, command.id).to_lowercase();
        init.name = names.allocate(&full_name);
        init.command = Some(vec![
            shell.to_string(),
            "-c".to_string(),
            shell_command_line(&exec.command_line, exec.working_dir.as_deref()),
        ]);
        init.args = Some(Vec::new());
        init.ports = None;
        if !exec.env.is_empty() {
            init.env
                .get_or_insert_with(Vec::new)
                .extend(crate::container::convert_env(&exec.env));
        }

        debug!(init_container = %init.name, command = %command.id, "Built preStart init container");
        init_containers.push(init);
    }
    Ok(init_containers)
}
