//! Command resolution and validation
//!
//! Resolves which devfile command runs for a lifecycle group, applying the
//! default/ambiguity rules:
//!
//! - an override name (from the command line) wins and may inject a group
//!   into a command that has none;
//! - a group with a single command uses it as the implicit default;
//! - a group with several commands needs exactly one `isDefault` command.
//!
//! Composite commands are validated against a case-insensitive index of the
//! devfile's commands, built per call. Override names are matched verbatim.

use crate::devfile::{Command, CommandGroup, CommandKind, CompositeCommand, Devfile, GroupKind};
use crate::errors::CommandError;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Command names supplied by the user, one per lifecycle group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOverrides {
    pub init: Option<String>,
    pub build: Option<String>,
    pub run: Option<String>,
    pub debug: Option<String>,
    pub test: Option<String>,
}

impl CommandOverrides {
    /// Override for a given group, if any
    pub fn for_group(&self, kind: GroupKind) -> Option<&str> {
        match kind {
            GroupKind::Init => self.init.as_deref(),
            GroupKind::Build => self.build.as_deref(),
            GroupKind::Run => self.run.as_deref(),
            GroupKind::Debug => self.debug.as_deref(),
            GroupKind::Test => self.test.as_deref(),
        }
    }
}

/// Commands resolved for one push, keyed by group
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CommandMap {
    entries: IndexMap<GroupKind, Command>,
}

impl CommandMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: GroupKind, command: Command) {
        self.entries.insert(kind, command);
    }

    pub fn get(&self, kind: GroupKind) -> Option<&Command> {
        self.entries.get(&kind)
    }

    pub fn contains(&self, kind: GroupKind) -> bool {
        self.entries.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in resolution order
    pub fn iter(&self) -> impl Iterator<Item = (&GroupKind, &Command)> {
        self.entries.iter()
    }
}

/// Find the command for `kind` without treating absence as an error
///
/// Returns `Ok(None)` when no override was given and the devfile has no
/// command in the group.
#[instrument(level = "debug", skip(devfile))]
pub fn find_command(
    devfile: &Devfile,
    kind: GroupKind,
    override_name: Option<&str>,
) -> Result<Option<Command>, CommandError> {
    if let Some(name) = override_name {
        let mut command = devfile
            .command(name)
            .cloned()
            .ok_or_else(|| CommandError::NotFound {
                name: name.to_string(),
            })?;

        match command.group_kind() {
            None => {
                debug!(command = %command.id, group = %kind, "Injecting group into override command");
                command.set_group(CommandGroup::new(kind, false));
            }
            Some(actual) if actual != kind => {
                return Err(CommandError::GroupMismatch {
                    id: command.id,
                    expected: kind,
                    actual,
                });
            }
            Some(_) => {}
        }

        validate_command(devfile, &command)?;
        return Ok(Some(command));
    }

    let candidates: Vec<&Command> = devfile
        .commands
        .iter()
        .filter(|c| c.group_kind() == Some(kind))
        .collect();

    if candidates.is_empty() {
        debug!(group = %kind, "No command found for group");
        return Ok(None);
    }

    validate_group(kind, &candidates)?;

    let selected = candidates
        .iter()
        .find(|c| c.is_default())
        .or_else(|| candidates.first().filter(|_| candidates.len() == 1))
        .copied();

    match selected {
        Some(command) => {
            validate_command(devfile, command)?;
            debug!(command = %command.id, group = %kind, "Resolved command");
            Ok(Some(command.clone()))
        }
        None => Err(CommandError::NoDefault { kind }),
    }
}

/// Resolve the command for `kind`; absence is an error for run and test
pub fn resolve_command(
    devfile: &Devfile,
    kind: GroupKind,
    override_name: Option<&str>,
) -> Result<Option<Command>, CommandError> {
    match find_command(devfile, kind, override_name)? {
        None if kind.is_mandatory() => Err(CommandError::GroupNotFound { kind }),
        resolved => Ok(resolved),
    }
}

/// Check the default rules of a group's candidate commands
pub fn validate_group(kind: GroupKind, candidates: &[&Command]) -> Result<(), CommandError> {
    if candidates.len() <= 1 {
        return Ok(());
    }

    match candidates.iter().filter(|c| c.is_default()).count() {
        0 => Err(CommandError::NoDefault { kind }),
        1 => Ok(()),
        _ => Err(CommandError::MultipleDefaults { kind }),
    }
}

/// Validate a single command against the devfile
pub fn validate_command(devfile: &Devfile, command: &Command) -> Result<(), CommandError> {
    match &command.kind {
        CommandKind::Composite(composite) => validate_composite(devfile, command, composite),
        CommandKind::Exec(exec) => {
            if exec.component.is_empty() || devfile.container(&exec.component).is_none() {
                return Err(CommandError::UnknownComponent {
                    id: command.id.clone(),
                    component: exec.component.clone(),
                });
            }
            if exec.command_line.trim().is_empty() {
                return Err(CommandError::EmptyCommandLine {
                    id: command.id.clone(),
                });
            }
            Ok(())
        }
    }
}

/// Validate a composite command and, transitively, its sub-commands
pub fn validate_composite(
    devfile: &Devfile,
    command: &Command,
    composite: &CompositeCommand,
) -> Result<(), CommandError> {
    let index = command_index(devfile);
    let mut stack = Vec::new();
    validate_composite_with_index(&index, devfile, command, composite, &mut stack)
}

fn validate_composite_with_index(
    index: &HashMap<String, &Command>,
    devfile: &Devfile,
    command: &Command,
    composite: &CompositeCommand,
    stack: &mut Vec<String>,
) -> Result<(), CommandError> {
    if composite.group.map(|g| g.kind) == Some(GroupKind::Run) {
        return Err(CommandError::CompositeRunKind {
            id: command.id.clone(),
        });
    }

    let own_id = command.id.to_lowercase();
    stack.push(own_id.clone());

    for sub_id in &composite.commands {
        let key = sub_id.to_lowercase();
        if key == own_id || stack.contains(&key) {
            return Err(CommandError::CompositeSelfReference {
                id: command.id.clone(),
            });
        }

        let sub = index
            .get(&key)
            .ok_or_else(|| CommandError::CompositeMissingSubcommand {
                id: command.id.clone(),
                sub_id: sub_id.clone(),
            })?;

        match &sub.kind {
            CommandKind::Composite(inner) => {
                validate_composite_with_index(index, devfile, sub, inner, stack)?
            }
            CommandKind::Exec(_) => validate_command(devfile, sub)?,
        }
    }

    stack.pop();
    Ok(())
}

/// Case-insensitive id -> command index
fn command_index(devfile: &Devfile) -> HashMap<String, &Command> {
    devfile
        .commands
        .iter()
        .map(|c| (c.id.to_lowercase(), c))
        .collect()
}

/// Resolve init, build and run for a push, reporting every failure at once
#[instrument(skip(devfile, overrides))]
pub fn resolve_push_command_set(
    devfile: &Devfile,
    overrides: &CommandOverrides,
) -> Result<CommandMap, CommandError> {
    let mut commands = CommandMap::new();
    let mut messages = Vec::new();

    for kind in [GroupKind::Init, GroupKind::Build, GroupKind::Run] {
        match resolve_command(devfile, kind, overrides.for_group(kind)) {
            Ok(Some(command)) => commands.insert(kind, command),
            Ok(None) => debug!(group = %kind, "Optional command group not provided"),
            Err(err) => messages.push(err.to_string()),
        }
    }

    if !messages.is_empty() {
        return Err(CommandError::Aggregate { messages });
    }
    Ok(commands)
}

/// Resolve the debug command; a devfile without one yields `None`
pub fn resolve_debug_command(
    devfile: &Devfile,
    override_name: Option<&str>,
) -> Result<Option<Command>, CommandError> {
    resolve_command(devfile, GroupKind::Debug, override_name)
}

/// Resolve the test command, which is mandatory
pub fn resolve_test_command(
    devfile: &Devfile,
    override_name: Option<&str>,
) -> Result<Command, CommandError> {
    resolve_command(devfile, GroupKind::Test, override_name)?.ok_or(CommandError::GroupNotFound {
        kind: GroupKind::Test,
    })
}

/// Expand a command into its exec commands, in execution order
pub fn flatten_command(devfile: &Devfile, command: &Command) -> Result<Vec<Command>, CommandError> {
    let index = command_index(devfile);
    let mut leaves = Vec::new();
    let mut stack = Vec::new();
    flatten_into(&index, command, &mut leaves, &mut stack)?;
    Ok(leaves)
}

fn flatten_into(
    index: &HashMap<String, &Command>,
    command: &Command,
    leaves: &mut Vec<Command>,
    stack: &mut Vec<String>,
) -> Result<(), CommandError> {
    match &command.kind {
        CommandKind::Exec(_) => leaves.push(command.clone()),
        CommandKind::Composite(composite) => {
            let own_id = command.id.to_lowercase();
            if stack.contains(&own_id) {
                return Err(CommandError::CompositeSelfReference {
                    id: command.id.clone(),
                });
            }
            stack.push(own_id);
            for sub_id in &composite.commands {
                let sub = index.get(&sub_id.to_lowercase()).ok_or_else(|| {
                    CommandError::CompositeMissingSubcommand {
                        id: command.id.clone(),
                        sub_id: sub_id.clone(),
                    }
                })?;
                flatten_into(index, sub, leaves, stack)?;
            }
            stack.pop();
        }
    }
    Ok(())
}

/// Groups resolved by every push
pub const PUSH_GROUPS: [GroupKind; 3] = [GroupKind::Init, GroupKind::Build, GroupKind::Run];

/// Validate every command of the devfile and the default rules of `groups`
///
/// Returns all problems found instead of stopping at the first one.
pub fn validate_devfile_commands(devfile: &Devfile, groups: &[GroupKind]) -> Vec<CommandError> {
    let mut problems = Vec::new();

    for &kind in groups {
        let candidates: Vec<&Command> = devfile
            .commands
            .iter()
            .filter(|c| c.group_kind() == Some(kind))
            .collect();
        if let Err(err) = validate_group(kind, &candidates) {
            problems.push(err);
        }
    }

    for command in &devfile.commands {
        if let Err(err) = validate_command(devfile, command) {
            problems.push(err);
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devfile::{Component, ContainerComponent};

    fn devfile_with(commands: Vec<Command>) -> Devfile {
        Devfile {
            components: vec![
                Component::container("runtime", ContainerComponent::new("node:18")),
                Component::container("tools", ContainerComponent::new("busybox")),
            ],
            commands,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_command_is_implicit_default() {
        let devfile = devfile_with(vec![
            Command::exec("build", "runtime", "npm install").with_group(GroupKind::Build, false)
        ]);
        let resolved = resolve_command(&devfile, GroupKind::Build, None)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, "build");
    }

    #[test]
    fn test_default_command_selected_among_many() {
        let devfile = devfile_with(vec![
            Command::exec("build1", "runtime", "make a").with_group(GroupKind::Build, false),
            Command::exec("build2", "runtime", "make b").with_group(GroupKind::Build, true),
        ]);
        let resolved = resolve_command(&devfile, GroupKind::Build, None)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, "build2");
    }

    #[test]
    fn test_no_default_among_many_fails() {
        let devfile = devfile_with(vec![
            Command::exec("run1", "runtime", "a").with_group(GroupKind::Run, false),
            Command::exec("run2", "runtime", "b").with_group(GroupKind::Run, false),
        ]);
        let err = resolve_command(&devfile, GroupKind::Run, None).unwrap_err();
        assert_eq!(
            err,
            CommandError::NoDefault {
                kind: GroupKind::Run
            }
        );
    }

    #[test]
    fn test_multiple_defaults_fail() {
        let devfile = devfile_with(vec![
            Command::exec("run1", "runtime", "a").with_group(GroupKind::Run, true),
            Command::exec("run2", "runtime", "b").with_group(GroupKind::Run, true),
        ]);
        let err = resolve_command(&devfile, GroupKind::Run, None).unwrap_err();
        assert_eq!(
            err,
            CommandError::MultipleDefaults {
                kind: GroupKind::Run
            }
        );
    }

    #[test]
    fn test_missing_mandatory_group_fails() {
        let devfile = devfile_with(vec![]);
        for kind in [GroupKind::Run, GroupKind::Test] {
            let err = resolve_command(&devfile, kind, None).unwrap_err();
            assert_eq!(err, CommandError::GroupNotFound { kind });
        }
    }

    #[test]
    fn test_missing_optional_group_is_absent() {
        let devfile = devfile_with(vec![]);
        for kind in [GroupKind::Init, GroupKind::Build, GroupKind::Debug] {
            assert_eq!(resolve_command(&devfile, kind, None).unwrap(), None);
        }
    }

    #[test]
    fn test_override_injects_group() {
        let devfile = devfile_with(vec![Command::exec("custom", "runtime", "echo hi")]);
        let resolved = resolve_command(&devfile, GroupKind::Build, Some("custom"))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.group_kind(), Some(GroupKind::Build));
        // The devfile itself is left untouched
        assert_eq!(devfile.command("custom").unwrap().group_kind(), None);
    }

    #[test]
    fn test_override_group_mismatch_fails() {
        let devfile = devfile_with(vec![
            Command::exec("devbuild", "runtime", "make").with_group(GroupKind::Build, true)
        ]);
        let err = resolve_command(&devfile, GroupKind::Run, Some("devbuild")).unwrap_err();
        assert_eq!(
            err,
            CommandError::GroupMismatch {
                id: "devbuild".to_string(),
                expected: GroupKind::Run,
                actual: GroupKind::Build,
            }
        );
        let message = err.to_string();
        assert!(message.contains("build") && message.contains("run"));
    }

    #[test]
    fn test_override_is_matched_verbatim() {
        let devfile = devfile_with(vec![Command::exec("DevRun", "runtime", "npm start")]);
        let err = resolve_command(&devfile, GroupKind::Run, Some("devrun")).unwrap_err();
        assert_eq!(
            err,
            CommandError::NotFound {
                name: "devrun".to_string()
            }
        );
    }

    #[test]
    fn test_exec_with_unknown_component_fails() {
        let devfile = devfile_with(vec![
            Command::exec("run", "missing", "npm start").with_group(GroupKind::Run, true)
        ]);
        let err = resolve_command(&devfile, GroupKind::Run, None).unwrap_err();
        assert!(err
            .to_string()
            .contains("does not map to a supported component"));
    }

    #[test]
    fn test_component_match_is_case_sensitive() {
        let devfile = devfile_with(vec![
            Command::exec("run", "Runtime", "npm start").with_group(GroupKind::Run, true)
        ]);
        assert!(resolve_command(&devfile, GroupKind::Run, None).is_err());
    }

    #[test]
    fn test_exec_with_empty_command_line_fails() {
        let devfile = devfile_with(vec![
            Command::exec("run", "runtime", "  ").with_group(GroupKind::Run, true)
        ]);
        let err = resolve_command(&devfile, GroupKind::Run, None).unwrap_err();
        assert_eq!(
            err,
            CommandError::EmptyCommandLine {
                id: "run".to_string()
            }
        );
    }

    #[test]
    fn test_composite_self_reference_fails() {
        let devfile = devfile_with(vec![
            Command::exec("install", "runtime", "npm install"),
            Command::composite("buildAll", ["install", "BUILDALL"]).with_group(GroupKind::Build, true),
        ]);
        let err = resolve_command(&devfile, GroupKind::Build, None).unwrap_err();
        assert_eq!(
            err,
            CommandError::CompositeSelfReference {
                id: "buildAll".to_string()
            }
        );
    }

    #[test]
    fn test_composite_missing_subcommand_fails() {
        let devfile = devfile_with(vec![
            Command::exec("install", "runtime", "npm install"),
            Command::composite("buildAll", ["install", "compile"]).with_group(GroupKind::Build, true),
        ]);
        let err = resolve_command(&devfile, GroupKind::Build, None).unwrap_err();
        assert_eq!(
            err,
            CommandError::CompositeMissingSubcommand {
                id: "buildAll".to_string(),
                sub_id: "compile".to_string(),
            }
        );
        assert!(err.to_string().contains("compile"));
        assert!(err.to_string().contains("buildAll"));
    }

    #[test]
    fn test_composite_subcommands_resolve_case_insensitively() {
        let devfile = devfile_with(vec![
            Command::exec("Install", "runtime", "npm install"),
            Command::exec("compile", "tools", "make"),
            Command::composite("buildAll", ["install", "COMPILE"]).with_group(GroupKind::Build, true),
        ]);
        let resolved = resolve_command(&devfile, GroupKind::Build, None)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, "buildAll");
    }

    #[test]
    fn test_composite_run_kind_is_rejected() {
        let devfile = devfile_with(vec![
            Command::exec("start", "runtime", "npm start"),
            Command::composite("runAll", ["start"]).with_group(GroupKind::Run, true),
        ]);
        let err = resolve_command(&devfile, GroupKind::Run, None).unwrap_err();
        assert_eq!(
            err,
            CommandError::CompositeRunKind {
                id: "runAll".to_string()
            }
        );
    }

    #[test]
    fn test_composite_cycle_is_rejected() {
        let devfile = devfile_with(vec![
            Command::composite("a", ["b"]).with_group(GroupKind::Build, true),
            Command::composite("b", ["a"]),
        ]);
        assert!(matches!(
            resolve_command(&devfile, GroupKind::Build, None),
            Err(CommandError::CompositeSelfReference { .. })
        ));
    }

    #[test]
    fn test_push_set_resolves_all_groups() {
        let devfile = devfile_with(vec![
            Command::exec("init", "runtime", "setup").with_group(GroupKind::Init, false),
            Command::exec("build", "runtime", "npm install").with_group(GroupKind::Build, false),
            Command::exec("run", "runtime", "npm start").with_group(GroupKind::Run, false),
        ]);
        let map = resolve_push_command_set(&devfile, &CommandOverrides::default()).unwrap();
        let order: Vec<GroupKind> = map.iter().map(|(k, _)| *k).collect();
        assert_eq!(order, vec![GroupKind::Init, GroupKind::Build, GroupKind::Run]);
    }

    #[test]
    fn test_push_set_omits_absent_optional_groups() {
        let devfile = devfile_with(vec![
            Command::exec("run", "runtime", "npm start").with_group(GroupKind::Run, false)
        ]);
        let map = resolve_push_command_set(&devfile, &CommandOverrides::default()).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains(GroupKind::Run));
        assert!(!map.contains(GroupKind::Build));
    }

    #[test]
    fn test_push_set_aggregates_every_error() {
        let devfile = devfile_with(vec![
            Command::exec("b1", "runtime", "a").with_group(GroupKind::Build, false),
            Command::exec("b2", "runtime", "b").with_group(GroupKind::Build, false),
        ]);
        let overrides = CommandOverrides {
            init: Some("nope".to_string()),
            ..Default::default()
        };
        let err = resolve_push_command_set(&devfile, &overrides).unwrap_err();
        let CommandError::Aggregate { messages } = &err else {
            panic!("expected aggregate error, got {err:?}");
        };
        assert_eq!(messages.len(), 3);
        assert!(messages[0].contains("\"nope\" is not found"));
        assert!(messages[1].contains("no default command"));
        assert!(messages[2].contains("command group of kind run not found"));
        assert_eq!(err.to_string().lines().count(), 3);
    }

    #[test]
    fn test_debug_and_test_resolution() {
        let devfile = devfile_with(vec![
            Command::exec("debug", "runtime", "npm run debug").with_group(GroupKind::Debug, true),
            Command::exec("test", "runtime", "npm test").with_group(GroupKind::Test, true),
        ]);
        assert_eq!(
            resolve_debug_command(&devfile, None).unwrap().unwrap().id,
            "debug"
        );
        assert_eq!(resolve_test_command(&devfile, None).unwrap().id, "test");

        let empty = devfile_with(vec![]);
        assert_eq!(resolve_debug_command(&empty, None).unwrap(), None);
        assert!(resolve_test_command(&empty, None).is_err());
    }

    #[test]
    fn test_flatten_composite_in_order() {
        let devfile = devfile_with(vec![
            Command::exec("a", "runtime", "echo a"),
            Command::exec("b", "runtime", "echo b"),
            Command::exec("c", "tools", "echo c"),
            Command::composite("ab", ["a", "b"]),
            Command::composite("all", ["ab", "C"]),
        ]);
        let all = devfile.command("all").unwrap();
        let ids: Vec<String> = flatten_command(&devfile, all)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_validate_devfile_commands_reports_all_problems() {
        let devfile = devfile_with(vec![
            Command::exec("r1", "runtime", "a").with_group(GroupKind::Run, false),
            Command::exec("r2", "runtime", "b").with_group(GroupKind::Run, false),
            Command::exec("orphan", "ghost", "c"),
        ]);
        let problems = validate_devfile_commands(&devfile, &PUSH_GROUPS);
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn test_validate_devfile_commands_checks_only_requested_groups() {
        let devfile = devfile_with(vec![
            Command::exec("run", "runtime", "a").with_group(GroupKind::Run, true),
            Command::exec("t1", "runtime", "b").with_group(GroupKind::Test, true),
            Command::exec("t2", "runtime", "c").with_group(GroupKind::Test, true),
        ]);
        assert!(validate_devfile_commands(&devfile, &PUSH_GROUPS).is_empty());

        let problems = validate_devfile_commands(&devfile, &[GroupKind::Run, GroupKind::Test]);
        assert_eq!(
            problems,
            vec![CommandError::MultipleDefaults {
                kind: GroupKind::Test
            }]
        );
    }
}
