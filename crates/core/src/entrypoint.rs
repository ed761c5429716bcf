//! Supervisor entrypoint wrapping
//!
//! The container hosting the run command (and the debug command, when one
//! resolves) has its entrypoint replaced by a process supervisor. The
//! resolved command line, working directory and debug port travel to the
//! supervisor as environment variables, so the application can be started
//! and restarted without recreating the pod.
//!
//! The supervisor binary is not part of the user image. An init container
//! copies it into a shared `emptyDir` volume that the wrapped containers
//! mount at `/opt/odo/`.

use crate::command::find_command;
use crate::container::add_env_if_absent;
use crate::devfile::{Command, CommandKind, Devfile, ExecCommand, GroupKind};
use crate::errors::{Result, SynthesisError};
use k8s_openapi::api::core::v1::{Container, EmptyDirVolumeSource, Volume, VolumeMount};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

pub const SUPERVISORD_BINARY: &str = "/opt/odo/bin/supervisord";
pub const SUPERVISORD_CONFIG: &str = "/opt/odo/conf/devfile-supervisor.conf";
pub const SUPERVISORD_VOLUME_NAME: &str = "odo-supervisord-shared-data";
pub const SUPERVISORD_MOUNT_PATH: &str = "/opt/odo/";

pub const ENV_ODO_COMMAND_RUN: &str = "ODO_COMMAND_RUN";
pub const ENV_ODO_COMMAND_RUN_WORKING_DIR: &str = "ODO_COMMAND_RUN_WORKING_DIR";
pub const ENV_ODO_COMMAND_DEBUG: &str = "ODO_COMMAND_DEBUG";
pub const ENV_ODO_COMMAND_DEBUG_WORKING_DIR: &str = "ODO_COMMAND_DEBUG_WORKING_DIR";
pub const ENV_ODO_DEBUG_PORT: &str = "ODO_DEBUG_PORT";

/// Debug port used when the caller supplies none
pub const DEFAULT_DEBUG_PORT: i32 = 5858;

pub const BOOTSTRAP_INIT_CONTAINER_NAME: &str = "copy-supervisord";
pub const DEFAULT_BOOTSTRAPPER_IMAGE: &str =
    "registry.access.redhat.com/ocp-tools-4/odo-init-container-rhel8:1.1.11";

/// Program managed by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorProgram {
    Run,
    Debug,
}

impl SupervisorProgram {
    /// Program name in the supervisor configuration
    pub fn program_name(&self) -> &'static str {
        match self {
            SupervisorProgram::Run => "devrun",
            SupervisorProgram::Debug => "debugrun",
        }
    }

    fn command_env(&self) -> &'static str {
        match self {
            SupervisorProgram::Run => ENV_ODO_COMMAND_RUN,
            SupervisorProgram::Debug => ENV_ODO_COMMAND_DEBUG,
        }
    }

    fn working_dir_env(&self) -> &'static str {
        match self {
            SupervisorProgram::Run => ENV_ODO_COMMAND_RUN_WORKING_DIR,
            SupervisorProgram::Debug => ENV_ODO_COMMAND_DEBUG_WORKING_DIR,
        }
    }
}

impl std::fmt::Display for SupervisorProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.program_name())
    }
}

/// Command line with the command's env vars exported in front
///
/// Values are double-quoted verbatim, without escaping.
pub fn command_with_env(exec: &ExecCommand) -> String {
    if exec.env.is_empty() {
        return exec.command_line.clone();
    }
    let exports = exec
        .env
        .iter()
        .map(|var| format!("{}=\"{}\"", var.name, var.value))
        .collect::<Vec<_>>()
        .join(" ");
    format!("export {} && {}", exports, exec.command_line)
}

/// Whether the container's entrypoint is the supervisor
pub fn is_wrapped(container: &Container) -> bool {
    container
        .command
        .as_ref()
        .map(|cmd| cmd.len() == 1 && cmd[0] == SUPERVISORD_BINARY)
        .unwrap_or(false)
}

/// Rewrite the containers hosting the run and debug commands
///
/// Containers are returned untouched when no run command resolves. An
/// override naming a missing command is an error.
#[instrument(skip(devfile, containers))]
pub fn wrap_with_supervisor(
    devfile: &Devfile,
    mut containers: Vec<Container>,
    run_override: Option<&str>,
    debug_override: Option<&str>,
    debug_port: Option<i32>,
) -> Result<Vec<Container>> {
    let run = find_command(devfile, GroupKind::Run, run_override)?;
    let debug_cmd = find_command(devfile, GroupKind::Debug, debug_override)?;

    let Some(run) = run else {
        debug!("No run command resolved, leaving entrypoints untouched");
        return Ok(containers);
    };

    apply_program(&mut containers, &run, SupervisorProgram::Run)?;

    if let Some(debug_cmd) = debug_cmd {
        if apply_program(&mut containers, &debug_cmd, SupervisorProgram::Debug)? {
            let port = debug_port.unwrap_or(DEFAULT_DEBUG_PORT);
            if let Some(exec) = debug_cmd.as_exec() {
                if let Some(container) = containers.iter_mut().find(|c| c.name == exec.component) {
                    add_env_if_absent(container, ENV_ODO_DEBUG_PORT, &port.to_string());
                }
            }
        }
    }

    Ok(containers)
}

/// Wrap the container targeted by `command`; false when nothing was wrapped
fn apply_program(
    containers: &mut [Container],
    command: &Command,
    program: SupervisorProgram,
) -> std::result::Result<bool, SynthesisError> {
    let exec = match &command.kind {
        CommandKind::Exec(exec) => exec,
        CommandKind::Composite(_) => {
            warn!(command = %command.id, %program, "Composite commands cannot be supervised, skipping");
            return Ok(false);
        }
    };

    let container = containers
        .iter_mut()
        .find(|c| c.name == exec.component)
        .ok_or_else(|| SynthesisError::UnknownComponent {
            command: command.id.clone(),
            component: exec.component.clone(),
        })?;

    debug!(container = %container.name, command = %command.id, %program, "Wrapping container with supervisor");
    wrap_container(container);

    add_env_if_absent(container, program.command_env(), &command_with_env(exec));
    if let Some(dir) = exec.working_dir.as_deref().filter(|d| !d.is_empty()) {
        add_env_if_absent(container, program.working_dir_env(), dir);
    }
    Ok(true)
}

fn wrap_container(container: &mut Container) {
    container.command = Some(vec![SUPERVISORD_BINARY.to_string()]);
    container.args = Some(vec!["-c".to_string(), SUPERVISORD_CONFIG.to_string()]);

    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
    if !mounts.iter().any(|m| m.name == SUPERVISORD_VOLUME_NAME) {
        mounts.push(supervisor_volume_mount());
    }
}

fn supervisor_volume_mount() -> VolumeMount {
    VolumeMount {
        name: SUPERVISORD_VOLUME_NAME.to_string(),
        mount_path: SUPERVISORD_MOUNT_PATH.to_string(),
        ..Default::default()
    }
}

/// Shared volume the supervisor binary is copied into
pub fn supervisor_volume() -> Volume {
    Volume {
        name: SUPERVISORD_VOLUME_NAME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

/// Init container copying the supervisor into the shared volume
pub fn supervisor_bootstrap_init_container(image: &str) -> Container {
    Container {
        name: BOOTSTRAP_INIT_CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        command: Some(vec!["/usr/bin/cp".to_string()]),
        args: Some(vec![
            "-r".to_string(),
            "/opt/odo-init/.".to_string(),
            SUPERVISORD_MOUNT_PATH.to_string(),
        ]),
        volume_mounts: Some(vec![supervisor_volume_mount()]),
        ..Default::default()
    }
}

/// Supervisor control command starting `program`
pub fn supervisor_start_command(program: SupervisorProgram) -> Vec<String> {
    vec![
        SUPERVISORD_BINARY.to_string(),
        "ctl".to_string(),
        "start".to_string(),
        program.program_name().to_string(),
    ]
}

/// Supervisor control command stopping every program
pub fn supervisor_stop_all_command() -> Vec<String> {
    vec![
        SUPERVISORD_BINARY.to_string(),
        "ctl".to_string(),
        "stop".to_string(),
        "all".to_string(),
    ]
}
