//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::kinds::KindRegistry;
use crate::planner::SyncMode;

/// kindsync - Dependency-ordered resource deployment.
#[derive(Parser, Debug)]
#[command(name = "kindsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "KINDSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create and update remote resources to match local descriptors.
    Deploy(SyncArgs),

    /// Delete remote resources that have no local descriptor.
    Clean(SyncArgs),

    /// Delete every remote resource of the selected kinds.
    Purge(SyncArgs),

    /// Report remote state without changing anything.
    Pull(SyncArgs),

    /// List registered kinds in dependency order.
    Kinds {
        /// Show dependencies of each kind.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Preview the rows of an ad hoc query.
    Preview {
        /// Query text.
        query: String,

        /// Maximum rows to return.
        #[arg(short, long, default_value = "100")]
        limit: usize,

        /// Environment to query.
        #[arg(long)]
        env: Option<String>,
    },

    /// Validate the configuration and descriptors.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },
}

/// Arguments shared by every sync command.
#[derive(Args, Debug, Clone, Default)]
pub struct SyncArgs {
    /// Plan and report without mutating anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Environment to target.
    #[arg(long)]
    pub env: Option<String>,

    /// Module or kind to process. Repeatable.
    #[arg(short, long = "select", value_name = "MODULE_OR_KIND")]
    pub select: Vec<String>,
}

impl Commands {
    /// Returns the sync mode and arguments of a sync command.
    #[must_use]
    pub const fn sync(&self) -> Option<(SyncMode, &SyncArgs)> {
        match self {
            Self::Deploy(args) => Some((SyncMode::Deploy, args)),
            Self::Clean(args) => Some((SyncMode::Clean, args)),
            Self::Purge(args) => Some((SyncMode::Purge, args)),
            Self::Pull(args) => Some((SyncMode::Pull, args)),
            Self::Kinds { .. } | Self::Preview { .. } | Self::Validate { .. } => None,
        }
    }
}

/// A `--select` list split into kind names and module names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Registered kind names.
    pub kinds: Vec<String>,
    /// Everything else, resolved against the modules directory.
    pub modules: Vec<String>,
}

impl Selection {
    /// Splits `selected` on whether each name is a registered kind.
    #[must_use]
    pub fn split(selected: &[String], registry: &KindRegistry) -> Self {
        let (kinds, modules) = selected
            .iter()
            .cloned()
            .partition(|name| registry.contains(name));
        Self { kinds, modules }
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{MockPlatformApi, PlatformApi};
    use std::sync::Arc;

    #[test]
    fn test_parse_deploy() {
        let cli = Cli::try_parse_from([
            "kindsync",
            "deploy",
            "--dry-run",
            "--env",
            "prod",
            "--select",
            "core",
            "-s",
            "datasets",
        ])
        .expect("parse");
        let (mode, args) = cli.command.sync().expect("sync command");
        assert_eq!(mode, SyncMode::Deploy);
        assert!(args.dry_run);
        assert_eq!(args.env.as_deref(), Some("prod"));
        assert_eq!(args.select, vec!["core", "datasets"]);
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from(["kindsync", "clean", "--log-json", "-v", "--output", "json"])
            .expect("parse");
        assert!(cli.log_json);
        assert!(cli.verbose);
        assert!(matches!(cli.output, OutputFormat::Json));
        assert_eq!(cli.command.sync().map(|(m, _)| m), Some(SyncMode::Clean));
    }

    #[test]
    fn test_non_sync_commands() {
        let cli =
            Cli::try_parse_from(["kindsync", "preview", "select 1", "-l", "5"]).expect("parse");
        assert!(cli.command.sync().is_none());
        assert!(matches!(cli.command, Commands::Preview { limit: 5, .. }));
    }

    #[test]
    fn test_split_selection() {
        let api: Arc<dyn PlatformApi> = Arc::new(MockPlatformApi::new());
        let registry = KindRegistry::standard(&api, 100);

        let selection = Selection::split(
            &[String::from("datasets"), String::from("core"), String::from("spaces")],
            &registry,
        );
        assert_eq!(selection.kinds, vec!["datasets", "spaces"]);
        assert_eq!(selection.modules, vec!["core"]);
    }
}
