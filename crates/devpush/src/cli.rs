use crate::commands::delete::{execute_delete, DeleteArgs};
use crate::commands::push::{execute_push, PushArgs};
use crate::commands::render::{execute_render, RenderArgs};
use crate::commands::resolve::{execute_resolve, ResolveArgs};
use crate::commands::shared::ComponentOptions;
use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use devpush_core::command::CommandOverrides;
use std::io::IsTerminal;
use std::path::PathBuf;

/// Log format options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log level options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Informational messages and above
    Info,
    /// Debug messages and above
    Debug,
    /// All messages including trace
    Trace,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Output format for rendered manifests
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Yaml,
}

/// Command selection flags shared by every subcommand that resolves commands
#[derive(Debug, Clone, Default, Args)]
pub struct CommandArgs {
    /// Devfile command to use for the init group
    #[arg(long, value_name = "ID")]
    pub init_command: Option<String>,
    /// Devfile command to use for the build group
    #[arg(long, value_name = "ID")]
    pub build_command: Option<String>,
    /// Devfile command to use for the run group
    #[arg(long, value_name = "ID")]
    pub run_command: Option<String>,
    /// Devfile command to use for the debug group
    #[arg(long, value_name = "ID")]
    pub debug_command: Option<String>,
    /// Devfile command to use for the test group
    #[arg(long, value_name = "ID")]
    pub test_command: Option<String>,
}

impl From<CommandArgs> for CommandOverrides {
    fn from(args: CommandArgs) -> Self {
        Self {
            init: args.init_command,
            build: args.build_command,
            run: args.run_command,
            debug: args.debug_command,
            test: args.test_command,
        }
    }
}

/// Flags describing the component to render or push
#[derive(Debug, Clone, Default, Args)]
pub struct ComponentArgs {
    /// Component name (defaults to the devfile's metadata name)
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    #[command(flatten)]
    pub commands: CommandArgs,

    /// Start the debug command instead of the run command
    #[arg(long)]
    pub debug: bool,

    /// Port the debugger listens on
    #[arg(long, value_name = "PORT")]
    pub debug_port: Option<i32>,
}

impl From<ComponentArgs> for ComponentOptions {
    fn from(args: ComponentArgs) -> Self {
        Self {
            name: args.name,
            overrides: args.commands.into(),
            debug: args.debug,
            debug_port: args.debug_port,
        }
    }
}

/// devpush subcommands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve and validate the devfile's commands
    Resolve {
        #[command(flatten)]
        commands: CommandArgs,
        /// Also resolve the debug command
        #[arg(long)]
        debug: bool,
        /// Also resolve the test command
        #[arg(long)]
        test: bool,
    },

    /// Print the cluster objects a push would apply, without a cluster
    Render {
        #[command(flatten)]
        component: ComponentArgs,
        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        output: ManifestFormat,
    },

    /// Create or update the component on the cluster and start it
    Push {
        #[command(flatten)]
        component: ComponentArgs,
        /// Disable the progress spinner
        #[arg(long)]
        no_spinner: bool,
    },

    /// Delete the component's Deployment, Service and pods
    Delete {
        /// Component name (defaults to the devfile's metadata name)
        #[arg(long, value_name = "NAME")]
        name: Option<String>,
    },
}

/// Push devfile components to a Kubernetes cluster
#[derive(Debug, Parser)]
#[command(name = "devpush")]
#[command(about = "Push devfile components to a Kubernetes cluster")]
#[command(version)]
pub struct Cli {
    /// Log format (text or json, defaults to text, can be set via DEVPUSH_LOG_FORMAT env var)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Devfile path
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        default_value = "devfile.yaml"
    )]
    pub devfile: PathBuf,

    /// Settings file path (TOML)
    #[arg(long, global = true, value_name = "PATH", env = "DEVPUSH_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Namespace (overrides settings and DEVPUSH_NAMESPACE)
    #[arg(long, short = 'n', global = true, value_name = "NAMESPACE")]
    pub namespace: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub async fn dispatch(self) -> Result<()> {
        let log_format = match self.log_format {
            Some(LogFormat::Text) => Some("text"),
            Some(LogFormat::Json) => Some("json"),
            None => None, // Let logging module check environment variable
        };

        let log_level = self.log_level.as_str();
        if std::env::var_os(devpush_core::logging::LOG_ENV).is_none()
            && std::env::var_os("RUST_LOG").is_none()
        {
            std::env::set_var(
                "RUST_LOG",
                format!("devpush={},devpush_core={}", log_level, log_level),
            );
        }
        devpush_core::logging::init(log_format)?;
        tracing::debug!("CLI initialized with log level: {}", log_level);

        match self.command {
            Commands::Resolve {
                commands,
                debug,
                test,
            } => {
                execute_resolve(ResolveArgs {
                    devfile: self.devfile,
                    overrides: commands.into(),
                    debug,
                    test,
                })
                .await
            }
            Commands::Render { component, output } => {
                execute_render(RenderArgs {
                    devfile: self.devfile,
                    settings: self.settings,
                    namespace: self.namespace,
                    component: component.into(),
                    output,
                })
                .await
            }
            Commands::Push {
                component,
                no_spinner,
            } => {
                let spinner = !no_spinner
                    && std::io::stderr().is_terminal()
                    && !matches!(log_format, Some("json"));
                execute_push(PushArgs {
                    devfile: self.devfile,
                    settings: self.settings,
                    namespace: self.namespace,
                    component: component.into(),
                    spinner,
                })
                .await
            }
            Commands::Delete { name } => {
                execute_delete(DeleteArgs {
                    devfile: self.devfile,
                    settings: self.settings,
                    namespace: self.namespace,
                    name,
                })
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing_push_with_overrides() {
        let cli = Cli::try_parse_from([
            "devpush",
            "push",
            "--run-command",
            "devrun",
            "--debug",
            "--debug-port",
            "9229",
            "--namespace",
            "dev",
        ])
        .unwrap();

        assert_eq!(cli.namespace.as_deref(), Some("dev"));
        assert_eq!(cli.devfile, PathBuf::from("devfile.yaml"));
        match cli.command {
            Commands::Push { component, .. } => {
                let options: ComponentOptions = component.into();
                assert_eq!(options.overrides.run.as_deref(), Some("devrun"));
                assert!(options.debug);
                assert_eq!(options.debug_port, Some(9229));
            }
            other => panic!("Expected push command, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_parsing_render_output() {
        let cli = Cli::try_parse_from([
            "devpush",
            "--devfile",
            "app/devfile.yaml",
            "render",
            "--output",
            "yaml",
        ])
        .unwrap();
        assert_eq!(cli.devfile, PathBuf::from("app/devfile.yaml"));
        assert!(matches!(
            cli.command,
            Commands::Render {
                output: ManifestFormat::Yaml,
                ..
            }
        ));
    }

    #[test]
    fn test_cli_parsing_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["devpush", "delete", "--name", "web", "--log-format", "json"])
                .unwrap();
        assert!(matches!(cli.log_format, Some(LogFormat::Json)));
        assert!(matches!(cli.command, Commands::Delete { name: Some(ref n) } if n == "web"));
    }

    #[test]
    fn test_cli_rejects_unknown_output() {
        assert!(Cli::try_parse_from(["devpush", "render", "--output", "xml"]).is_err());
    }
}
