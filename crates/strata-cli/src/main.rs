mod banner;
mod scaffold;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use strata_config::{AppConfig, ConfigLoader, LogConfig};
use strata_db::{Migration, RollbackSummary, Runner, connection};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Ordered, batch-atomic schema migrations for SQLite"
)]
struct Cli {
    /// Config file, or a directory containing config.yml / config.toml
    #[arg(long, global = true, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Database file (overrides the config)
    #[arg(long, global = true, env = "STRATA_DATABASE")]
    database: Option<PathBuf>,

    /// Migration directory; repeat to scan several (overrides the config)
    #[arg(long = "source", global = true)]
    sources: Vec<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show every migration and whether it is applied
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// List pending migrations in the order they would run
    Pending,
    /// Apply all pending migrations as one batch
    Migrate,
    /// Roll back the most recent batch(es)
    Rollback {
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },
    /// Roll back every applied batch
    Reset,
    /// Create a new, empty migration file
    Make {
        /// Short description, used in the file name
        #[arg(required = true)]
        description: Vec<String>,
    },
    /// Write a default config.yml and migrations directory
    Init {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // `init` creates the config, so it must not require one.
    let config = match &cli.command {
        Command::Init { .. } => AppConfig::default(),
        _ => load_config(&cli)?,
    };
    init_tracing(&config.log, cli.verbose, cli.log_json);
    let runner = Runner::from_config(&config.migrations).context("invalid migration settings")?;

    match cli.command {
        Command::Init { dir } => {
            let path = scaffold::init_project(&dir)?;
            println!("Config written to {}", path.display());
        }
        Command::Make { description } => {
            let dir = runner
                .discovery()
                .primary_directory()
                .context("no migration source directory configured")?;
            let path = scaffold::create_migration(dir, &description.join(" "), chrono::Utc::now())?;
            println!("Created {}", path.display());
        }
        Command::Status { json } => {
            let conn = connection::open_configured(&config.database)?;
            let statuses = runner.status(&conn)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else {
                banner::print_banner(&config);
                banner::print_status(&statuses);
            }
        }
        Command::Pending => {
            let conn = connection::open_configured(&config.database)?;
            let pending = runner.pending(&conn)?;
            if pending.is_empty() {
                println!("Nothing pending.");
            }
            for migration in pending {
                println!("{}", migration.name());
            }
        }
        Command::Migrate => {
            let conn = connection::open_configured(&config.database)?;
            match runner.run_pending(&conn).context("migration batch failed")? {
                0 => println!("Nothing to migrate."),
                n => println!("Applied {n} migration(s)."),
            }
        }
        Command::Rollback { steps } => {
            if steps == 0 {
                bail!("--steps must be at least 1");
            }
            let conn = connection::open_configured(&config.database)?;
            let summary = runner
                .rollback_batches(&conn, steps)
                .context("rollback failed")?;
            report_rollback(&summary);
        }
        Command::Reset => {
            let conn = connection::open_configured(&config.database)?;
            let summary = runner.reset(&conn).context("reset failed")?;
            report_rollback(&summary);
        }
    }

    Ok(())
}

/// `--config`, then the working directory, then the platform config
/// directory; command-line overrides are applied last.
fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) if path.is_dir() => ConfigLoader::new(path).load()?,
        Some(path) => ConfigLoader::load_file(path)?,
        None => {
            let cwd = ConfigLoader::new(".");
            match (cwd.find(), ConfigLoader::default_dir()) {
                (Some(path), _) => ConfigLoader::load_file(&path)?,
                (None, Some(dir)) => ConfigLoader::new(dir).load()?,
                (None, None) => AppConfig::default(),
            }
        }
    };

    if let Some(database) = &cli.database {
        config.database.path = database.clone();
    }
    if !cli.sources.is_empty() {
        config.migrations.sources = cli.sources.clone();
    }
    Ok(config)
}

fn init_tracing(log: &LogConfig, verbose: bool, json: bool) {
    let default_directive = if verbose { "debug" } else { log.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json || log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn report_rollback(summary: &RollbackSummary) {
    if !summary.batches.is_empty() {
        info!("rolled back batches {:?}", summary.batches);
    }
    for line in rollback_report(summary) {
        println!("{line}");
    }
}

/// Stdout lines for a rollback. Missing definitions were already logged by
/// the runner; this only tells the operator.
fn rollback_report(summary: &RollbackSummary) -> Vec<String> {
    let mut lines: Vec<String> = summary
        .missing
        .iter()
        .map(|name| {
            format!("warning: {name} has no definition; its ledger row was removed without reverting")
        })
        .collect();

    if summary.count() == 0 {
        lines.push("Nothing to roll back.".to_string());
    } else {
        lines.push(format!(
            "Rolled back {} migration(s) from {} batch(es).",
            summary.count(),
            summary.batches.len()
        ));
    }
    lines
}
