//! Integration tests for devfile loading and command resolution

mod common;

use common::{node_devfile, write_devfile, NODE_DEVFILE};
use devpush_core::command::{
    flatten_command, resolve_debug_command, resolve_push_command_set, CommandOverrides,
};
use devpush_core::devfile::{Devfile, GroupKind};
use devpush_core::errors::{ConfigError, DevpushError};
use devpush_core::lifecycle::{expand_event_commands, LifecycleEvent};

#[test]
fn test_load_devfile_from_disk() {
    let (_dir, path) = write_devfile(NODE_DEVFILE);
    let devfile = Devfile::load_from_path(&path).unwrap();

    assert_eq!(devfile.component_name(), "nodejs-web");
    assert_eq!(devfile.containers().count(), 1);
    assert_eq!(devfile.volumes().count(), 1);
    assert_eq!(devfile.events.pre_start, vec!["fetch-config", "warm"]);
    assert_eq!(devfile, node_devfile());
}

#[test]
fn test_load_json_devfile() {
    let json = r#"{
        "metadata": {"name": "api"},
        "components": [{"name": "tools", "container": {"image": "golang:1.22"}}],
        "commands": [
            {"id": "run", "exec": {"component": "tools", "commandLine": "go run .",
             "group": {"kind": "run"}}}
        ]
    }"#;
    let (_dir, path) = write_devfile(json);
    let devfile = Devfile::load_from_path(&path).unwrap();
    let commands = resolve_push_command_set(&devfile, &CommandOverrides::default()).unwrap();
    assert_eq!(commands.get(GroupKind::Run).unwrap().id, "run");
}

#[test]
fn test_missing_devfile() {
    let dir = tempfile::TempDir::new().unwrap();
    let err = Devfile::load_from_path(&dir.path().join("devfile.yaml")).unwrap_err();
    assert!(matches!(
        err,
        DevpushError::Config(ConfigError::NotFound { .. })
    ));
}

#[test]
fn test_command_with_both_bodies_is_rejected() {
    let yaml = r#"
commands:
  - id: broken
    exec:
      component: runtime
      commandLine: "true"
    composite:
      commands: [a]
"#;
    let err = Devfile::from_yaml_str(yaml).unwrap_err();
    assert!(err
        .to_string()
        .contains("command must be of type exec or composite"));
}

#[test]
fn test_fixture_command_resolution() {
    let devfile = node_devfile();
    let commands = resolve_push_command_set(&devfile, &CommandOverrides::default()).unwrap();
    let groups: Vec<_> = commands.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(groups, vec![GroupKind::Build, GroupKind::Run]);

    let debug = resolve_debug_command(&devfile, None).unwrap().unwrap();
    assert_eq!(debug.id, "debug");

    let warm = devfile.command("warm").unwrap();
    let leaves: Vec<_> = flatten_command(&devfile, warm)
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(leaves, vec!["warm-a", "warm-b"]);
}

#[test]
fn test_override_injects_group() {
    let devfile = node_devfile();
    let overrides = CommandOverrides {
        init: Some("fetch-config".to_string()),
        ..Default::default()
    };
    let commands = resolve_push_command_set(&devfile, &overrides).unwrap();
    let init = commands.get(GroupKind::Init).unwrap();
    assert_eq!(init.id, "fetch-config");
    assert_eq!(init.group_kind(), Some(GroupKind::Init));
}

#[test]
fn test_override_group_mismatch_and_missing_run_are_aggregated() {
    let mut devfile = node_devfile();
    devfile.commands.retain(|c| c.id != "run");
    let overrides = CommandOverrides {
        build: Some("debug".to_string()),
        ..Default::default()
    };
    let err = resolve_push_command_set(&devfile, &overrides).unwrap_err();
    let message = err.to_string();
    let lines: Vec<_> = message.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("command group mismatched"));
    assert!(lines[1].contains("command group of kind run not found"));
}

#[test]
fn test_prestart_expansion_order() {
    let ids: Vec<_> = expand_event_commands(&node_devfile(), LifecycleEvent::PreStart)
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec!["fetch-config", "warm-a", "warm-b"]);
}
