//! Devfile model and loading
//!
//! This module holds the in-memory devfile model consumed by the rest of the
//! pipeline: commands, components, projects and lifecycle events. The model is
//! deserialized with serde from YAML or JSON; no schema validation happens
//! here beyond the structural rules the types themselves encode (a command is
//! exactly one of exec or composite, a component is exactly one of container
//! or volume).
//!
//! The model is read-only input. Resolution and synthesis never mutate it;
//! they clone what they need.

use crate::errors::{CommandError, ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, instrument};

/// Lifecycle phase a command can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Init,
    Build,
    Run,
    Debug,
    Test,
}

impl GroupKind {
    /// Get the group kind name as string
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKind::Init => "init",
            GroupKind::Build => "build",
            GroupKind::Run => "run",
            GroupKind::Debug => "debug",
            GroupKind::Test => "test",
        }
    }

    /// Whether a devfile must provide a command for this group
    pub fn is_mandatory(&self) -> bool {
        matches!(self, GroupKind::Run | GroupKind::Test)
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GroupKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "init" => Ok(GroupKind::Init),
            "build" => Ok(GroupKind::Build),
            "run" => Ok(GroupKind::Run),
            "debug" => Ok(GroupKind::Debug),
            "test" => Ok(GroupKind::Test),
            _ => Err(format!(
                "Unknown command group '{}'. Valid groups: init, build, run, debug, test",
                s
            )),
        }
    }
}

/// Group binding of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandGroup {
    pub kind: GroupKind,
    #[serde(default)]
    pub is_default: bool,
}

impl CommandGroup {
    pub fn new(kind: GroupKind, is_default: bool) -> Self {
        Self { kind, is_default }
    }
}

/// Environment variable declared on a command or container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Command executed in a specific container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecCommand {
    #[serde(default)]
    pub component: String,
    #[serde(default)]
    pub command_line: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<CommandGroup>,
}

/// Command made of other commands, referenced by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeCommand {
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<CommandGroup>,
    #[serde(default)]
    pub parallel: bool,
}

/// The body of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Exec(ExecCommand),
    Composite(CompositeCommand),
}

/// A named devfile command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CommandDefinition", into = "CommandDefinition")]
pub struct Command {
    pub id: String,
    pub kind: CommandKind,
}

/// Wire shape of a command: `exec` and `composite` are mutually exclusive
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommandDefinition {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exec: Option<ExecCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    composite: Option<CompositeCommand>,
}

impl TryFrom<CommandDefinition> for Command {
    type Error = CommandError;

    fn try_from(def: CommandDefinition) -> std::result::Result<Self, Self::Error> {
        let kind = match (def.exec, def.composite) {
            (Some(exec), None) => CommandKind::Exec(exec),
            (None, Some(composite)) => CommandKind::Composite(composite),
            _ => return Err(CommandError::InvalidType { id: def.id }),
        };
        Ok(Command { id: def.id, kind })
    }
}

impl From<Command> for CommandDefinition {
    fn from(command: Command) -> Self {
        let (exec, composite) = match command.kind {
            CommandKind::Exec(exec) => (Some(exec), None),
            CommandKind::Composite(composite) => (None, Some(composite)),
        };
        CommandDefinition {
            id: command.id,
            exec,
            composite,
        }
    }
}

impl Command {
    /// Create an exec command targeting `component`
    pub fn exec(
        id: impl Into<String>,
        component: impl Into<String>,
        command_line: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: CommandKind::Exec(ExecCommand {
                component: component.into(),
                command_line: command_line.into(),
                working_dir: None,
                env: Vec::new(),
                group: None,
            }),
        }
    }

    /// Create a composite command over `commands`
    pub fn composite<I, S>(id: impl Into<String>, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            kind: CommandKind::Composite(CompositeCommand {
                commands: commands.into_iter().map(Into::into).collect(),
                group: None,
                parallel: false,
            }),
        }
    }

    pub fn with_group(mut self, kind: GroupKind, is_default: bool) -> Self {
        self.set_group(CommandGroup::new(kind, is_default));
        self
    }

    /// Set the working directory; no-op on composite commands
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        if let CommandKind::Exec(exec) = &mut self.kind {
            exec.working_dir = Some(dir.into());
        }
        self
    }

    /// Append an environment variable; no-op on composite commands
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let CommandKind::Exec(exec) = &mut self.kind {
            exec.env.push(EnvVar::new(name, value));
        }
        self
    }

    pub fn group(&self) -> Option<&CommandGroup> {
        match &self.kind {
            CommandKind::Exec(exec) => exec.group.as_ref(),
            CommandKind::Composite(composite) => composite.group.as_ref(),
        }
    }

    pub fn set_group(&mut self, group: CommandGroup) {
        match &mut self.kind {
            CommandKind::Exec(exec) => exec.group = Some(group),
            CommandKind::Composite(composite) => composite.group = Some(group),
        }
    }

    pub fn group_kind(&self) -> Option<GroupKind> {
        self.group().map(|g| g.kind)
    }

    pub fn is_default(&self) -> bool {
        self.group().map(|g| g.is_default).unwrap_or(false)
    }

    pub fn as_exec(&self) -> Option<&ExecCommand> {
        match &self.kind {
            CommandKind::Exec(exec) => Some(exec),
            CommandKind::Composite(_) => None,
        }
    }

    pub fn as_composite(&self) -> Option<&CompositeCommand> {
        match &self.kind {
            CommandKind::Composite(composite) => Some(composite),
            CommandKind::Exec(_) => None,
        }
    }
}

/// How an endpoint is exposed outside the component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exposure {
    #[default]
    Public,
    Internal,
    None,
}

impl Exposure {
    /// Precedence rank when several endpoints share a port; higher wins
    pub fn rank(&self) -> u8 {
        match self {
            Exposure::Public => 2,
            Exposure::Internal => 1,
            Exposure::None => 0,
        }
    }
}

/// Application protocol of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointProtocol {
    #[default]
    Http,
    Https,
    Ws,
    Wss,
    Tcp,
    Udp,
}

impl EndpointProtocol {
    /// Transport protocol name used by container and service ports
    pub fn transport(&self) -> &'static str {
        match self {
            EndpointProtocol::Udp => "UDP",
            _ => "TCP",
        }
    }
}

/// Network endpoint declared by a container component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub name: String,
    pub target_port: i32,
    #[serde(default)]
    pub exposure: Exposure,
    #[serde(default)]
    pub protocol: EndpointProtocol,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, target_port: i32) -> Self {
        Self {
            name: name.into(),
            target_port,
            exposure: Exposure::default(),
            protocol: EndpointProtocol::default(),
            secure: false,
            path: None,
        }
    }

    pub fn with_exposure(mut self, exposure: Exposure) -> Self {
        self.exposure = exposure;
        self
    }
}

/// Reference from a container to a volume component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMountRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Container component body
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerComponent {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_sources: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_mapping: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMountRef>,
}

impl ContainerComponent {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Sources are mounted unless explicitly disabled
    pub fn mounts_sources(&self) -> bool {
        self.mount_sources.unwrap_or(true)
    }
}

/// Volume component body
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VolumeComponent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

/// The body of a component
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentKind {
    Container(ContainerComponent),
    Volume(VolumeComponent),
}

/// A named devfile component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ComponentDefinition", into = "ComponentDefinition")]
pub struct Component {
    pub name: String,
    pub kind: ComponentKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ComponentDefinition {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container: Option<ContainerComponent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    volume: Option<VolumeComponent>,
}

impl TryFrom<ComponentDefinition> for Component {
    type Error = String;

    fn try_from(def: ComponentDefinition) -> std::result::Result<Self, Self::Error> {
        let kind = match (def.container, def.volume) {
            (Some(container), None) => ComponentKind::Container(container),
            (None, Some(volume)) => ComponentKind::Volume(volume),
            _ => {
                return Err(format!(
                    "component {} must be of type container or volume",
                    def.name
                ))
            }
        };
        Ok(Component {
            name: def.name,
            kind,
        })
    }
}

impl From<Component> for ComponentDefinition {
    fn from(component: Component) -> Self {
        let (container, volume) = match component.kind {
            ComponentKind::Container(c) => (Some(c), None),
            ComponentKind::Volume(v) => (None, Some(v)),
        };
        ComponentDefinition {
            name: component.name,
            container,
            volume,
        }
    }
}

impl Component {
    pub fn container(name: impl Into<String>, container: ContainerComponent) -> Self {
        Self {
            name: name.into(),
            kind: ComponentKind::Container(container),
        }
    }

    pub fn volume(name: impl Into<String>, size: Option<&str>) -> Self {
        Self {
            name: name.into(),
            kind: ComponentKind::Volume(VolumeComponent {
                size: size.map(str::to_string),
            }),
        }
    }
}

/// Starter project cloned into the source volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_path: Option<String>,
}

impl Project {
    /// Directory under the source mount holding this project
    pub fn source_dir(&self) -> &str {
        match self.clone_path.as_deref() {
            Some(path) if !path.is_empty() => path,
            _ => &self.name,
        }
    }
}

/// Lifecycle events, each an ordered list of command ids
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Events {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_start: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_start: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Parsed devfile
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Devfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<Project>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Component>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub events: Events,
}

impl Devfile {
    /// Parse a devfile from YAML (JSON is accepted as a YAML subset)
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            ConfigError::Parsing {
                what: "devfile".to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Load a devfile from disk
    #[instrument]
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let devfile = Self::from_yaml_str(&content)?;
        debug!(
            components = devfile.components.len(),
            commands = devfile.commands.len(),
            "Loaded devfile"
        );
        Ok(devfile)
    }

    /// Container components in declaration order
    pub fn containers(&self) -> impl Iterator<Item = (&str, &ContainerComponent)> {
        self.components.iter().filter_map(|c| match &c.kind {
            ComponentKind::Container(container) => Some((c.name.as_str(), container)),
            ComponentKind::Volume(_) => None,
        })
    }

    /// Volume components in declaration order
    pub fn volumes(&self) -> impl Iterator<Item = (&str, &VolumeComponent)> {
        self.components.iter().filter_map(|c| match &c.kind {
            ComponentKind::Volume(volume) => Some((c.name.as_str(), volume)),
            ComponentKind::Container(_) => None,
        })
    }

    /// Look up a container component by exact name
    pub fn container(&self, name: &str) -> Option<&ContainerComponent> {
        self.containers()
            .find(|(component, _)| *component == name)
            .map(|(_, container)| container)
    }

    /// Look up a command by exact id
    pub fn command(&self, id: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.id == id)
    }

    /// Name used for cluster objects, falling back to "component"
    pub fn component_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("component")
    }
}
