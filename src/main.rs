//! kindsync CLI entrypoint.
//!
//! This is the main entrypoint for the kindsync command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use kindsync::cli::{Cli, Commands, OutputFormatter, Selection, SyncArgs};
use kindsync::config::{
    find_config_file, ConfigParser, ConfigValidator, DescriptorHasher, DescriptorLoader,
    StateBackend, SyncConfig,
};
use kindsync::error::{ConfigError, Result};
use kindsync::kinds::{CapabilitySet, KindRegistry};
use kindsync::orchestrator::{DeployOrchestrator, OrchestratorOptions, RunRequest, RunStatus};
use kindsync::planner::{DependencyGraph, DiffEngine, SyncMode};
use kindsync::platform::{PlatformApi, PlatformClient};
use kindsync::reconciler::Reconciler;
use kindsync::state::{CheckpointStore, ClaimManager, LocalCheckpointStore, S3CheckpointStore};

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code of a run in which some kind failed or was skipped.
const EXIT_RUN_FAILED: u8 = 1;

/// Exit code of an error raised before or outside a run.
const EXIT_ERROR: u8 = 2;

/// Exit code of a run suspended by its time budget.
const EXIT_SUSPENDED: u8 = 3;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::from(EXIT_ERROR);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(RunStatus::Completed) => ExitCode::SUCCESS,
        Ok(RunStatus::Failed) => ExitCode::from(EXIT_RUN_FAILED),
        Ok(RunStatus::Suspended) => ExitCode::from(EXIT_SUSPENDED),
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<RunStatus> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_ref();

    if let Some((mode, args)) = cli.command.sync() {
        return cmd_sync(config_path, mode, args, &formatter).await;
    }

    match cli.command {
        Commands::Kinds { detailed } => cmd_kinds(config_path, detailed, &formatter),
        Commands::Preview { query, limit, env } => {
            cmd_preview(config_path, &query, limit, env.as_deref(), &formatter).await
        }
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Deploy(_) | Commands::Clean(_) | Commands::Purge(_) | Commands::Pull(_) => {
            Ok(RunStatus::Completed)
        }
    }
}

/// Loaded configuration and the directory it was found in.
struct Workspace {
    config: SyncConfig,
    root: PathBuf,
    warnings: Vec<String>,
}

impl Workspace {
    fn loader(&self) -> DescriptorLoader {
        DescriptorLoader::new(self.root.join(&self.config.modules_dir))
    }
}

/// Runs deploy, clean, purge or pull.
async fn cmd_sync(
    config_path: Option<&PathBuf>,
    mode: SyncMode,
    args: &SyncArgs,
    formatter: &OutputFormatter,
) -> Result<RunStatus> {
    let workspace = load_workspace(config_path, args.env.as_deref())?;
    let config = &workspace.config;
    let engine = &config.engine;

    let api: Arc<dyn PlatformApi> = Arc::new(create_client(config, true)?);
    let registry = Arc::new(KindRegistry::standard(&api, config.platform.page_size));

    let selection = Selection::split(&args.select, &registry);
    let descriptors = workspace.loader().load(&selection.modules)?;

    info!(
        "{mode} {}/{}: {} descriptor(s), {} kind(s) selected",
        config.project.name,
        config.project.environment,
        descriptors.len(),
        selection.kinds.len()
    );

    let granted = api.inspect_capabilities().await?;
    debug!("Granted {} capability entries", granted.iter().count());

    let reconciler = Reconciler::new(DiffEngine::new(engine.update_mode), engine.retry_policy())
        .with_batch_size(engine.batch_size);
    let options = OrchestratorOptions {
        workers: engine.workers,
        dry_run: args.dry_run,
        executor: engine.executor_options(),
        time_budget: engine.time_budget(),
        safety_margin: Duration::from_secs(engine.safety_margin_secs),
    };
    let mut orchestrator =
        DeployOrchestrator::new(registry, granted, reconciler).with_options(options);

    let run_key = if args.dry_run {
        None
    } else {
        let store = create_state_store(config, &workspace.root).await?;
        let ttl = i64::try_from(engine.claim_ttl_secs).unwrap_or(i64::MAX);
        let claims = ClaimManager::new(Arc::clone(&store), ttl);
        info!("Claim holder: {}", claims.holder());
        orchestrator = orchestrator.with_store(store, claims);
        Some(DescriptorHasher::new().run_key(
            &config.project.name,
            &config.project.environment,
            mode,
            &selection.kinds,
            &descriptors,
        ))
    };

    let report = orchestrator
        .run(RunRequest {
            mode,
            descriptors,
            selection: selection.kinds,
            run_key,
        })
        .await?;

    println!("{}", formatter.format_report(&report));
    Ok(report.status)
}

/// Lists registered kinds in dependency order.
fn cmd_kinds(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<RunStatus> {
    let workspace = load_workspace(config_path, None)?;
    let api: Arc<dyn PlatformApi> = Arc::new(create_client(&workspace.config, false)?);
    let registry = KindRegistry::standard(&api, workspace.config.platform.page_size);

    let all: Vec<String> = registry.names().map(str::to_string).collect();
    let graph = DependencyGraph::build(&registry, &all, &std::collections::BTreeMap::new())?;

    println!("{}", formatter.format_kinds(&registry, &graph, detailed));
    Ok(RunStatus::Completed)
}

/// Previews the rows of an ad hoc query.
async fn cmd_preview(
    config_path: Option<&PathBuf>,
    query: &str,
    limit: usize,
    env: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<RunStatus> {
    let workspace = load_workspace(config_path, env)?;
    let client = create_client(&workspace.config, true)?;
    let rows = client.preview_query(query, limit).await?;
    println!("{}", formatter.format_preview(&rows));
    Ok(RunStatus::Completed)
}

/// Validates configuration and descriptors without contacting the platform.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<RunStatus> {
    let workspace = load_workspace(config_path, None)?;
    let config = &workspace.config;

    let api: Arc<dyn PlatformApi> = Arc::new(create_client(config, false)?);
    let registry = Arc::new(KindRegistry::standard(&api, config.platform.page_size));
    let loader = workspace.loader();
    let modules = loader.modules()?;
    let descriptors = loader.load(&[])?;
    let descriptor_count = descriptors.len();

    let orchestrator =
        DeployOrchestrator::new(registry, CapabilitySet::new(), Reconciler::default());
    let graph = orchestrator.graph(&RunRequest {
        mode: SyncMode::Deploy,
        descriptors,
        selection: Vec::new(),
        run_key: None,
    })?;

    formatter.success("Configuration is valid");
    if show_warnings {
        for warning in workspace.warnings.iter().chain(graph.notes()) {
            formatter.warning(warning);
        }
    }

    eprintln!("\nConfiguration summary:");
    eprintln!("  Project: {}", config.project.name);
    eprintln!("  Environment: {}", config.project.environment);
    eprintln!("  Modules: {}", modules.len());
    eprintln!("  Descriptors: {descriptor_count}");
    eprintln!("  Deploy order: {}", graph.deploy_order().join(" -> "));

    Ok(RunStatus::Completed)
}

/// Resolves the config file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads, overlays and validates the configuration.
fn load_workspace(config_path: Option<&PathBuf>, environment: Option<&str>) -> Result<Workspace> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let root = config_file
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let parser = ConfigParser::new().with_base_path(&root);
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file, environment)?;
    let validation = ConfigValidator::new().validate(&config)?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }

    Ok(Workspace {
        config,
        root,
        warnings: validation.warnings,
    })
}

/// Creates the platform client.
///
/// Commands that never reach the network may run without a token.
fn create_client(config: &SyncConfig, require_token: bool) -> Result<PlatformClient> {
    let token = if require_token {
        ConfigParser::get_token()?
    } else {
        ConfigParser::get_token().unwrap_or_default()
    };
    PlatformClient::with_timeouts(
        &config.platform.base_url,
        &config.project.name,
        &token,
        Duration::from_secs(config.platform.timeout_secs),
        Duration::from_secs(config.platform.preview_timeout_secs),
    )
}

/// Creates the checkpoint store selected by the configuration.
async fn create_state_store(config: &SyncConfig, root: &Path) -> Result<Arc<dyn CheckpointStore>> {
    let store: Arc<dyn CheckpointStore> = match config.state.backend {
        StateBackend::Local => {
            let path = config
                .state
                .path
                .as_ref()
                .map_or_else(|| root.join(".kindsync"), |p| root.join(p));
            Arc::new(LocalCheckpointStore::with_base_dir(path))
        }
        StateBackend::S3 => {
            let bucket = config
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| {
                    ConfigError::validation("S3 bucket name is required", "state.bucket")
                })?;
            Arc::new(
                S3CheckpointStore::new(
                    bucket,
                    config.state.prefix.as_deref(),
                    config.state.region.as_deref(),
                )
                .await,
            )
        }
    };
    debug!("Using {} checkpoint store", store.backend_type());
    Ok(store)
}
