use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use gradewatch::config::Config;
use gradewatch::notify::{build_notifier, ConsoleNotifier, Notifier};
use gradewatch::portal::PortalClient;
use gradewatch::store::StateStore;
use gradewatch::watcher::{GradeWatcher, RunReport};
use tracing::warn;

#[derive(Debug, Parser)]
#[command(name = "gradewatch", about = "Watches a grade portal for score changes")]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Check {
        #[arg(long)]
        data_file: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
    TestNotify,
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    // `config --init` must work before a config file exists, so it is
    // dispatched before the load.
    if matches!(cli.command, Commands::Config { .. }) {
        return handle_config_command(&cli.command, &config_path);
    }

    let config = Config::load(&config_path)?;

    match &cli.command {
        Commands::Check { data_file, dry_run } => {
            let report = run_check(&config, data_file.clone(), *dry_run).await?;
            print_report(&report);
        }
        Commands::TestNotify => run_test_notify(&config).await?,
        Commands::Config { .. } => unreachable!("config command handled before dispatch"),
    }

    Ok(())
}

async fn run_check(
    config: &Config,
    data_file: Option<PathBuf>,
    dry_run: bool,
) -> Result<RunReport> {
    let notifier = resolve_notifier(config, dry_run)?;
    let data_path = data_file.unwrap_or_else(|| config.data_file.clone());
    let source = PortalClient::new(
        config.username.clone(),
        config.password.clone(),
        config.raw_dump_file.clone(),
    );
    let watcher = GradeWatcher::new(Box::new(source), StateStore::new(data_path), notifier)
        .with_quiet_first_run(config.quiet_first_run);

    match watcher.run_once().await {
        Ok(report) => Ok(report),
        Err(err) => {
            warn!(stage = ?err.stage(), "check aborted");
            Err(err).context("grade check failed")
        }
    }
}

fn resolve_notifier(config: &Config, dry_run: bool) -> Result<Option<Box<dyn Notifier>>> {
    if dry_run {
        return Ok(Some(Box::new(ConsoleNotifier)));
    }
    match config.channel() {
        Some(channel) => {
            let notifier = build_notifier(&channel).context("invalid notifier config")?;
            Ok(Some(notifier))
        }
        None => {
            warn!("no notifier configured, changes will only be recorded");
            Ok(None)
        }
    }
}

fn print_report(report: &RunReport) {
    if !report.has_changes() {
        println!("No grade changes. Tracking {} courses.", report.tracked_after);
        return;
    }
    println!(
        "{} new, {} updated ({} fetched, {} tracked).",
        report.new_count(),
        report.updated_count(),
        report.fetched,
        report.tracked_after
    );
    for change in &report.changes {
        println!("  [{:?}] {}", change.kind, change.course.key());
    }
}

async fn run_test_notify(config: &Config) -> Result<()> {
    let channel = config
        .channel()
        .ok_or_else(|| anyhow!("no notifier configured"))?;
    let notifier = build_notifier(&channel).context("invalid notifier config")?;
    let delivered = notifier
        .send(
            "Gradewatch test",
            "If you can read this, the notification channel works.",
            None,
        )
        .await;
    if !delivered {
        return Err(anyhow!("test notification was not delivered"));
    }
    println!("Test notification delivered via {}.", notifier.channel_name());
    Ok(())
}

fn handle_config_command(command: &Commands, config_path: &PathBuf) -> Result<()> {
    let Commands::Config { init, show } = command else {
        return Ok(());
    };
    if *init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if *show || !*init {
        let config = Config::load(config_path)?;
        println!("{}", serde_yaml::to_string(&config.redacted())?);
    }
    Ok(())
}
