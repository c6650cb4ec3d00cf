mod cli;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands, DaemonArgs, MirrorArgs, NightlogArgs, ServeArgs, StatusArgs};
use nightrelay::config::{Config, DirectoryConfig, ValidationError, require_directories};
use nightrelay::daemon::{DaemonSettings, Orchestrator};
use nightrelay::ledger::StatusShelf;
use nightrelay::mirror::{self, MirrorPool, MirrorRequest, PidFile};
use nightrelay::nightlog::NightlogSync;
use nightrelay::observability::Observer;
use nightrelay::server;
use nightrelay::tools::{HpssArchiver, ShellRemote};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

const MIRROR_PID_FILE: &str = "nightrelay_mirror.pid";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let loaded = match cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    let config = match loaded {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Daemon(args) => daemon(config, args).await,
        Commands::Status(args) => status(&config, args),
        Commands::Mirror(args) => run_mirror(&config, args).await,
        Commands::Serve(args) => serve(&config, args).await,
        Commands::Nightlog(args) => nightlog(&config, args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Status directory from the command line or the first configured tree
fn status_dir(config: &Config, directory: Option<PathBuf>) -> Result<PathBuf, ValidationError> {
    match directory {
        Some(dir) => Ok(dir),
        None => config
            .directories
            .values()
            .next()
            .map(DirectoryConfig::status_dir)
            .ok_or(ValidationError::NoDirectoriesConfigured),
    }
}

async fn daemon(config: Arc<Config>, args: DaemonArgs) -> Result<(), AnyError> {
    require_directories(&config)?;

    let settings = DaemonSettings {
        shadow: args.shadow,
        no_backup: args.no_backup,
        kill_file: args.kill,
    };
    if let Some(kill) = settings.kill_file.as_ref().or(config.daemon.kill_file.as_ref()) {
        if kill.exists() {
            warn!("{} already exists; the daemon will stop after one pass.", kill.display());
        }
    }

    let observer = Arc::new(Observer::new(config.daemon.alert_log.clone()));
    let remote = ShellRemote::new(config.remote.clone(), config.pipeline.clone());
    let archiver = HpssArchiver::new(config.archive.clone())?;

    let mut orchestrator = Orchestrator::new(
        Arc::clone(&config),
        Box::new(remote),
        Box::new(archiver),
        observer,
        settings,
    );
    orchestrator.run(args.once).await;
    Ok(())
}

fn status(config: &Config, args: StatusArgs) -> Result<(), AnyError> {
    let directory = status_dir(config, args.directory)?;
    let mut shelf = StatusShelf::new(directory);
    let written = shelf.update(&args.night, args.expid, args.stage, args.failure, args.last)?;
    info!(
        night = %args.night,
        stage = %args.stage,
        written,
        "Status updated"
    );
    Ok(())
}

async fn run_mirror(config: &Config, args: MirrorArgs) -> Result<(), AnyError> {
    let settings = &config.mirror;
    let request = MirrorRequest {
        include_static: args.include_static,
        exclude: args.exclude,
        checksum: args.checksum,
        destination: args.destination,
    };
    let jobs = mirror::plan(settings, &request)?;
    if args.dry_run {
        for job in &jobs {
            info!(directory = %job.directory, "{}", job.command);
        }
        return Ok(());
    }

    let _guard = PidFile::acquire(settings.log_dir.join(MIRROR_PID_FILE))?;
    if let Some(url) = &settings.status_url {
        mirror::wait_for_upstream(url, settings.wait.as_duration()).await?;
    }

    let observer = Observer::new(config.daemon.alert_log.clone());
    let pool = MirrorPool::new(
        settings.processes,
        settings.poll_interval.as_duration(),
        config.daemon.kill_file.clone(),
    );
    let summary = pool.run(jobs, &observer).await?;
    if !summary.failed.is_empty() {
        warn!(failed = ?summary.failed, "Some directories failed to mirror");
    }
    Ok(())
}

async fn serve(config: &Config, args: ServeArgs) -> Result<(), AnyError> {
    let directory = status_dir(config, args.directory)?;
    server::run(args.address, directory).await
}

async fn nightlog(config: &Config, args: NightlogArgs) -> Result<(), AnyError> {
    let mut settings = config.nightlog.clone();
    if args.no_permission {
        settings.permission_fixup = false;
    }
    let kill_file = args.kill.or_else(|| config.daemon.kill_file.clone());

    let observer = Observer::new(config.daemon.alert_log.clone());
    let remote = ShellRemote::new(config.remote.clone(), config.pipeline.clone());
    let sync = NightlogSync::new(
        &settings,
        &remote,
        &observer,
        config.permissions.fixup_tool.as_deref(),
    );
    sync.run(kill_file.as_deref(), args.once).await?;
    Ok(())
}
