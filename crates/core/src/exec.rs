//! In-pod command execution
//!
//! Init, build and event commands run to completion inside the component's
//! running pod through a shell. Run and debug commands are long-lived, so
//! they are handed to the supervisor instead: every program is stopped, then
//! the requested one is started.

use crate::cluster::ClusterClient;
use crate::command::flatten_command;
use crate::devfile::{Command, Devfile};
use crate::entrypoint::{
    command_with_env, supervisor_start_command, supervisor_stop_all_command, SupervisorProgram,
};
use crate::errors::Result;
use crate::io::line_capture;
use crate::lifecycle::shell_command_line;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Output of one exec command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOutput {
    pub command_id: String,
    pub container: String,
    pub lines: Vec<String>,
}

/// Shell invocation for an exec command: `[shell, "-c", "<cd wd && >[export ... && ]cmd"]`
pub fn shell_invocation(command: &Command, shell: &str) -> Option<Vec<String>> {
    let exec = command.as_exec()?;
    let line = shell_command_line(&command_with_env(exec), exec.working_dir.as_deref());
    Some(vec![shell.to_string(), "-c".to_string(), line])
}

/// Run a command to completion in `pod`
///
/// Composites are flattened and their exec commands run one after another in
/// declaration order; the first failure stops the sequence.
#[instrument(skip(client, devfile, command), fields(command = %command.id))]
pub async fn execute_command<C: ClusterClient>(
    client: &C,
    devfile: &Devfile,
    pod: &str,
    command: &Command,
    shell: &str,
) -> Result<Vec<ExecOutput>> {
    let mut outputs = Vec::new();
    for leaf in flatten_command(devfile, command)? {
        let Some(exec) = leaf.as_exec() else {
            continue;
        };
        let Some(invocation) = shell_invocation(&leaf, shell) else {
            continue;
        };

        info!(command = %leaf.id, container = %exec.component, "Executing command");
        let (writer, lines) = line_capture();
        client
            .exec_in_container(pod, &exec.component, &invocation, writer)
            .await?;
        let lines = lines.collect().await;
        debug!(command = %leaf.id, lines = lines.len(), "Command finished");

        outputs.push(ExecOutput {
            command_id: leaf.id.clone(),
            container: exec.component.clone(),
            lines,
        });
    }
    Ok(outputs)
}

/// Restart the supervisor with only `program` running
#[instrument(skip(client))]
pub async fn start_supervised<C: ClusterClient>(
    client: &C,
    pod: &str,
    container: &str,
    program: SupervisorProgram,
) -> Result<()> {
    let (writer, _lines) = line_capture();
    client
        .exec_in_container(pod, container, &supervisor_stop_all_command(), writer)
        .await?;

    let (writer, _lines) = line_capture();
    client
        .exec_in_container(pod, container, &supervisor_start_command(program), writer)
        .await?;
    info!(%pod, %container, %program, "Started supervised program");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::{pod, MockCluster, MockExecResponse, MockOperation};
    use crate::container::component_labels;
    use crate::devfile::GroupKind;

    fn devfile() -> Devfile {
        Devfile {
            commands: vec![
                Command::exec("install", "runtime", "npm install")
                    .with_working_dir("/projects")
                    .with_env("CI", "true"),
                Command::exec("lint", "tools", "npm run lint"),
                Command::composite("prepare", ["install", "lint"])
                    .with_group(GroupKind::Build, true),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_shell_invocation() {
        let devfile = devfile();
        let install = devfile.command("install").unwrap();
        assert_eq!(
            shell_invocation(install, "/bin/sh").unwrap(),
            vec![
                "/bin/sh",
                "-c",
                "cd /projects && export CI=\"true\" && npm install"
            ]
        );
        assert!(shell_invocation(devfile.command("prepare").unwrap(), "/bin/sh").is_none());
    }

    #[tokio::test]
    async fn test_composite_runs_in_order() {
        let cluster = MockCluster::new();
        cluster.add_pod(pod("web-1", &component_labels("web"), "Running"));
        cluster.set_exec_response(
            &["/bin/sh", "-c", "npm run lint"],
            MockExecResponse {
                stdout: vec!["clean".to_string()],
                exit_code: 0,
            },
        );

        let devfile = devfile();
        let outputs = execute_command(
            &cluster,
            &devfile,
            "web-1",
            devfile.command("prepare").unwrap(),
            "/bin/sh",
        )
        .await
        .unwrap();

        let ids: Vec<_> = outputs.iter().map(|o| o.command_id.as_str()).collect();
        assert_eq!(ids, vec!["install", "lint"]);
        assert_eq!(outputs[1].container, "tools");
        assert_eq!(outputs[1].lines, vec!["clean"]);

        let targets: Vec<_> = cluster
            .calls_of(MockOperation::Exec)
            .into_iter()
            .map(|c| c.target)
            .collect();
        assert_eq!(targets, vec!["web-1/runtime", "web-1/tools"]);
    }

    #[tokio::test]
    async fn test_failure_stops_sequence() {
        let cluster = MockCluster::new();
        cluster.add_pod(pod("web-1", &component_labels("web"), "Running"));
        cluster.set_exec_response(
            &[
                "/bin/sh",
                "-c",
                "cd /projects && export CI=\"true\" && npm install",
            ],
            MockExecResponse {
                stdout: Vec::new(),
                exit_code: 2,
            },
        );

        let devfile = devfile();
        let result = execute_command(
            &cluster,
            &devfile,
            "web-1",
            devfile.command("prepare").unwrap(),
            "/bin/sh",
        )
        .await;
        assert!(result.is_err());
        assert_eq!(cluster.calls_of(MockOperation::Exec).len(), 1);
    }

    #[tokio::test]
    async fn test_start_supervised_stops_then_starts() {
        let cluster = MockCluster::new();
        cluster.add_pod(pod("web-1", &component_labels("web"), "Running"));
        start_supervised(&cluster, "web-1", "runtime", SupervisorProgram::Run)
            .await
            .unwrap();

        let commands = cluster.exec_commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0][2..], ["stop", "all"]);
        assert_eq!(commands[1][2..], ["start", "devrun"]);
    }
}
