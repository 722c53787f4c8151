use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use vigil::{
    BackupKind, Outcome, RequestedLevel, RollbackTrigger,
    alerts::Dispatcher,
    backup::BackupManager,
    config::{Config, read_config_file},
    controller::{ComposeController, ServiceController},
    git::{CliGit, GitRepo},
    health::Aggregator,
    incident::Reporter,
    monitor::MonitorHandle,
    rollback::Orchestrator,
};

#[derive(Debug, Clone, Parser)]
#[command(name = "vigil", about = "Deployment health monitor with tiered rollback")]
struct Args {
    /// Config file
    #[arg(short, long, default_value = "vigil.json")]
    file: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the continuous health monitor until interrupted
    Monitor,

    /// Execute a rollback at the given (or auto-detected) level
    Rollback {
        #[arg(long, default_value = "manual")]
        trigger: RollbackTrigger,

        /// config|images|code|full|auto, or 1..4
        #[arg(long, default_value = "auto")]
        level: RequestedLevel,

        /// Explicit revision for the code level
        #[arg(long)]
        target_rev: Option<String>,
    },

    /// Run one health check and print the status document
    Health,

    /// Create a backup and print its id
    Backup {
        #[arg(long, default_value = "manual")]
        kind: BackupKind,
    },

    /// Restore a backup by id
    Restore { backup_id: String },
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("vigil", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

/// Everything the subcommands need, wired from one config file.
struct Stack {
    aggregator: Arc<Aggregator>,
    orchestrator: Arc<Orchestrator>,
    backups: Arc<BackupManager>,
    alerts: Arc<Dispatcher>,
    config: Config,
}

fn build(config: Config, cancel: CancellationToken) -> Stack {
    let services = config.service_names();

    let controller: Arc<dyn ServiceController> = Arc::new(
        ComposeController::new(
            config.backup.project_root.clone(),
            config.database.service.clone(),
        )
        .with_database(config.database.user.clone(), config.database.name.clone()),
    );
    let git: Arc<dyn GitRepo> = Arc::new(CliGit::new(config.backup.project_root.clone()));

    let aggregator = Arc::new(
        Aggregator::new(config.services.clone(), config.thresholds.clone())
            .with_snapshot_path(config.incident_root.join("health.json")),
    );
    let alerts = Arc::new(Dispatcher::new(&config.alert));
    let backups = Arc::new(BackupManager::new(
        config.backup.clone(),
        controller.clone(),
        git.clone(),
        services.clone(),
    ));
    let incidents = Arc::new(Reporter::new(
        config.incident_root.clone(),
        controller.clone(),
        git.clone(),
        services.clone(),
    ));

    let orchestrator = Arc::new(
        Orchestrator::new(
            aggregator.clone(),
            controller,
            git,
            backups.clone(),
            incidents,
            alerts.clone(),
            services,
            &config.monitor,
        )
        .with_cancellation(cancel),
    );

    Stack {
        aggregator,
        orchestrator,
        backups,
        alerts,
        config,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();

    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    let cancel = CancellationToken::new();
    let stack = build(config, cancel.clone());

    match args.command {
        Command::Monitor => {
            let (handle, join) = MonitorHandle::spawn(
                stack.aggregator.clone(),
                stack.orchestrator.clone(),
                stack.alerts.clone(),
                stack.config.monitor.clone(),
                cancel.clone(),
            );

            info!("monitor running, press ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            info!("shutdown requested, letting the current step finish");

            cancel.cancel();
            handle.shutdown().await;
            if let Err(e) = join.await {
                error!("monitor task failed: {e}");
            }
        }

        Command::Rollback {
            trigger,
            level,
            target_rev,
        } => {
            match stack
                .orchestrator
                .execute(trigger, level, target_rev.as_deref())
                .await
            {
                Ok(attempt) => {
                    println!("{}", serde_json::to_string_pretty(&attempt)?);
                    if attempt.outcome != Some(Outcome::Succeeded) {
                        std::process::exit(1);
                    }
                }
                Err(e) => {
                    error!("rollback failed: {e}");
                    std::process::exit(1);
                }
            }
        }

        Command::Health => {
            let status = stack.aggregator.check_all().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
            if !status.is_healthy() {
                std::process::exit(1);
            }
        }

        Command::Backup { kind } => {
            match stack
                .backups
                .create(kind, Some(stack.aggregator.as_ref()))
                .await
            {
                Ok(manifest) => {
                    debug!("backup manifest: {manifest:?}");
                    println!("{}", manifest.id);
                }
                Err(e) => {
                    error!("backup failed: {e}");
                    std::process::exit(1);
                }
            }
        }

        Command::Restore { backup_id } => {
            if let Err(e) = stack.backups.restore(&backup_id).await {
                error!("restore failed: {e}");
                std::process::exit(1);
            }
            info!("restored backup {backup_id}");
        }
    }

    Ok(())
}
