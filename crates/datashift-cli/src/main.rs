mod output;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use datashift_config::{AppConfig, ConfigLoader};
use datashift_core::scaffold::{self, Template};
use datashift_core::{Migrator, Registry, Store, VersionLog, commands};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Config files picked up from the working directory when `--config` is not
/// given.
const DEFAULT_CONFIG_FILES: &[&str] = &["datashift.yml", "datashift.yaml", "datashift.toml"];

#[derive(Parser)]
#[command(
    name = "datashift",
    version,
    about = "Apply and roll back versioned data migrations"
)]
struct Cli {
    /// Configuration file (YAML or TOML).
    #[arg(short, long, global = true, env = "DATASHIFT_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file, overriding the config.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Data migrations directory, overriding the config.
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply every pending data migration.
    Migrate,

    /// Apply a single data migration.
    Up {
        /// Version to apply.
        #[arg(long = "version", env = "VERSION", value_name = "VERSION")]
        target: Option<String>,
    },

    /// Roll back a single data migration.
    Down {
        /// Version to roll back.
        #[arg(long = "version", env = "VERSION", value_name = "VERSION")]
        target: Option<String>,
    },

    /// Show applied and pending data migrations.
    Status {
        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the highest applied version (0 when none).
    Current,

    /// Generate a new, empty SQL data migration.
    ///
    /// Code migrations need a handler compiled into a `Registry`, which this
    /// binary does not carry; scaffold those with `datashift_core::scaffold`.
    New {
        /// Migration name, e.g. `backfill_user_emails`.
        name: String,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(&cli)?;
    let dir = config.migrations.dir.as_path();

    let migrator = || open_migrator(&config);

    match cli.command {
        Command::Migrate => {
            let report = commands::migrate(&migrator()?, dir)?;
            output::print_report(&report);
        }
        Command::Up { target } => {
            let report = commands::migrate_up(&migrator()?, dir, target.as_deref())?;
            output::print_report(&report);
        }
        Command::Down { target } => {
            let report = commands::migrate_down(&migrator()?, dir, target.as_deref())?;
            output::print_report(&report);
        }
        Command::Status { json } => {
            let status = migrator()?.status(dir)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                output::print_status(&status, dir);
            }
        }
        Command::Current => {
            println!("{}", migrator()?.current_version()?);
        }
        Command::New { name } => {
            let path = scaffold::generate(dir, &name, chrono::Utc::now(), Template::Sql)?;
            println!("  Created {}", path.display());
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let path = cli.config.clone().or_else(|| {
        DEFAULT_CONFIG_FILES
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
    });
    debug!("config file: {:?}", path);

    let mut config = ConfigLoader::load(path.as_deref())?;
    if let Some(database) = &cli.database {
        config.database.path = database.clone();
    }
    if let Some(dir) = &cli.dir {
        config.migrations.dir = dir.clone();
    }
    Ok(config)
}

fn open_migrator(config: &AppConfig) -> Result<Migrator> {
    let db_path: &Path = &config.database.path;
    let store = Store::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    let log = VersionLog::new(config.migrations.log_table.clone())?;
    Ok(Migrator::new(store, log, Registry::new()))
}
