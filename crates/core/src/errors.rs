//! Error types and handling
//!
//! The error taxonomy has one enum per domain (command resolution, synthesis,
//! cluster reconciliation, settings) wrapped by [`DevpushError`] for unified
//! handling. Validation and synthesis errors are raised before any mutating
//! cluster call is made.

use crate::devfile::GroupKind;
use thiserror::Error;

/// Command validation and resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// A command override named a command that is not in the devfile
    #[error("the command \"{name}\" is not found in the devfile")]
    NotFound { name: String },

    /// A command override targets a command bound to another group
    #[error("command group mismatched, command {id} is of group {actual} in devfile.yaml, but {expected} was requested")]
    GroupMismatch {
        id: String,
        expected: GroupKind,
        actual: GroupKind,
    },

    /// A mandatory group has no command at all
    #[error("command group of kind {kind} not found in the devfile")]
    GroupNotFound { kind: GroupKind },

    /// Several commands in the group, none marked default
    #[error("there should be exactly one default command for command group {kind}, currently there is no default command")]
    NoDefault { kind: GroupKind },

    /// Several commands in the group marked default
    #[error("there should be exactly one default command for command group {kind}, currently there is more than one default command")]
    MultipleDefaults { kind: GroupKind },

    /// A command definition is neither exec nor composite (or both)
    #[error("command must be of type exec or composite")]
    InvalidType { id: String },

    /// An exec command references a component that is not a container
    #[error("the command \"{id}\" does not map to a supported component")]
    UnknownComponent { id: String, component: String },

    /// An exec command has an empty command line
    #[error("the command \"{id}\" has an empty command line")]
    EmptyCommandLine { id: String },

    /// Composite commands cannot be bound to the run group
    #[error("composite commands of run kind are not supported currently, command {id} is a composite of run kind")]
    CompositeRunKind { id: String },

    /// A composite command lists itself as a sub-command
    #[error("the composite command {id} cannot reference itself")]
    CompositeSelfReference { id: String },

    /// A composite command lists a sub-command that does not exist
    #[error("the command {sub_id} mentioned in the composite command {id} does not exist in the devfile")]
    CompositeMissingSubcommand { id: String, sub_id: String },

    /// Every failure collected while resolving a push command set
    #[error("{}", messages.join("\n"))]
    Aggregate { messages: Vec<String> },
}

/// Container synthesis errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    /// A command targets a component with no synthesized container
    #[error("the command \"{command}\" targets component \"{component}\" which has no container")]
    UnknownComponent { command: String, component: String },

    /// A lifecycle event names a command that cannot be turned into a container
    #[error("the event command \"{id}\" is neither an exec nor a composite command")]
    UnsupportedEvent { id: String },

    /// Composites nested inside a composite event command are not expanded
    #[error("the composite command \"{id}\" nests composite command \"{sub_id}\", which is not supported for lifecycle events")]
    NestedComposite { id: String, sub_id: String },

    /// A container mounts a volume component that does not exist
    #[error("the container \"{container}\" mounts unknown volume \"{volume}\"")]
    UnknownVolume { container: String, volume: String },

    /// A required resource quantity could not be parsed
    #[error("invalid quantity \"{value}\" for {field}")]
    InvalidQuantity { field: String, value: String },
}

/// Cluster reconciliation errors
#[derive(Error, Debug)]
pub enum ClusterError {
    /// The cluster API rejected a request
    #[error("cluster API error ({code}): {message}")]
    Api { code: u16, message: String },

    /// The cluster client could not be constructed or reached
    #[error("cluster client error: {0}")]
    Client(String),

    /// An object expected to exist was not found
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    /// Failure injected by the in-memory cluster
    #[error("injected failure: {0}")]
    Injected(String),

    /// Pod watch failed or its stream ended before a pod was running
    #[error("pod watch failed: {message}")]
    Watch { message: String },

    /// No pod became running before the readiness timeout
    #[error("timed out after {timeout:?} waiting for a running pod matching {selector}")]
    ReadinessTimeout {
        selector: String,
        timeout: std::time::Duration,
    },

    /// The component pod entered a terminal failed phase
    #[error("pod {name} entered phase {phase}")]
    PodFailed { name: String, phase: String },

    /// Deletion target has no pods
    #[error("the component {name} doesn't exist on the cluster")]
    ComponentNotFound { name: String },

    /// Running a command inside a container failed
    #[error("failed to execute command in container {container}: {message}")]
    Exec { container: String, message: String },
}

impl ClusterError {
    /// Whether the error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ClusterError::NotFound { .. } | ClusterError::Api { code: 404, .. }
        )
    }

    /// Whether the error is a write conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Api { code: 409, .. })
    }
}

impl DevpushError {
    /// The cluster error behind this error, if any
    pub fn as_cluster(&self) -> Option<&ClusterError> {
        match self {
            DevpushError::Cluster(err) => Some(err),
            _ => None,
        }
    }
}

/// Settings-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Settings or devfile parsing error
    #[error("Failed to parse {what}: {message}")]
    Parsing { what: String, message: String },

    /// Settings validation error
    #[error("Configuration validation error: {message}")]
    Validation { message: String },

    /// File I/O error
    #[error("Failed to read configuration file")]
    Io(#[from] std::io::Error),

    /// File not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: String },
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum DevpushError {
    /// Command validation or resolution errors
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Container synthesis errors
    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Cluster reconciliation errors
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Configuration or devfile loading errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Convenience type alias for Results with DevpushError
pub type Result<T> = std::result::Result<T, DevpushError>;

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => ClusterError::Api {
                code: response.code,
                message: response.message,
            },
            other => ClusterError::Client(other.to_string()),
        }
    }
}

impl From<kube::Error> for DevpushError {
    fn from(err: kube::Error) -> Self {
        DevpushError::Cluster(err.into())
    }
}
