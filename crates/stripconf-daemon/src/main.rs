//! Stripconf - command-line front end
//!
//! Opens the configured backend through `ConfigDb` and summarizes, seeds or
//! re-uploads the partition's hardware descriptions.

mod config;
mod report;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stripconf_core::{BackendMode, ConfigDb, FecCabling};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::report::Summary;

#[derive(Parser, Debug)]
#[command(name = "stripconf")]
#[command(about = "Strip tracker hardware configuration tool")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "stripconf.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Refresh all caches and print their sizes
    Summary {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Synthesize descriptions from the FED connections and upload them
    Seed {
        /// Create a new major version
        #[arg(long)]
        new_major: bool,
    },
    /// Refresh all caches and upload them again
    Upload {
        /// Create a new major version
        #[arg(long)]
        new_major: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Stripconf v{}", env!("CARGO_PKG_VERSION"));

    if let Command::Init { force } = args.command {
        if args.config.exists() && !force {
            bail!(
                "{} already exists; use --force to overwrite",
                args.config.display()
            );
        }
        config::save_default_config(&args.config)?;
        println!("Wrote default configuration to {}", args.config.display());
        return Ok(());
    }

    let config = config::load_config(&args.config)?;
    let mut db = open(&config)?;

    match args.command {
        Command::Init { .. } => {}
        Command::Summary { json } => {
            let summary = Summary::collect(&mut db, config.report.fed_ids);
            if json {
                let output = if config.report.pretty {
                    serde_json::to_string_pretty(&summary)?
                } else {
                    serde_json::to_string(&summary)?
                };
                println!("{}", output);
            } else {
                summary.print_text();
            }
        }
        Command::Seed { new_major } => seed(&mut db, new_major)?,
        Command::Upload { new_major } => upload(&mut db, new_major)?,
    }

    db.close_connection();
    Ok(())
}

/// Build and open the configuration; incomplete inputs are tolerated
fn open(config: &Config) -> Result<ConfigDb> {
    // No SQL client is linked into this binary: database mode opens unavailable.
    let mut db = ConfigDb::from_params(config.params.clone(), None)?;
    match db.open_connection() {
        Ok(()) => {}
        Err(err) if err.is_degraded() => {
            warn!(error = %err, "Continuing with incomplete input files");
        }
        Err(err) => return Err(err).context("Failed to open configuration backend"),
    }
    info!(
        mode = %db.mode(),
        partition = %db.partition(),
        "Configuration open"
    );
    Ok(db)
}

fn seed(db: &mut ConfigDb, new_major: bool) -> Result<()> {
    let cabling = FecCabling::from_connections(db.fed_connections());
    if cabling.is_empty() {
        bail!("No FED connections found; nothing to seed");
    }

    let generated = db.create_descriptions(&cabling);
    info!(
        modules = cabling.module_count(),
        devices = generated.devices.len(),
        pia_resets = generated.pia_resets.len(),
        conversions = generated.dcu_conversions.len(),
        skipped = generated.skipped,
        "Synthesized descriptions"
    );
    if generated.skipped > 0 {
        warn!(
            skipped = generated.skipped,
            "Some cabling nodes have unencodable addresses"
        );
    }

    let total = generated.total();
    db.replace_device_descriptions(generated.devices);
    db.replace_pia_reset_descriptions(generated.pia_resets);

    db.take_last_failure();
    if db.mode() == BackendMode::UsingDatabase {
        db.upload_pia_reset_descriptions();
    }
    db.upload_device_descriptions(new_major);
    if let Some(failure) = db.take_last_failure() {
        bail!("Seeding failed: {}", failure);
    }

    println!(
        "Seeded {} descriptions for {} modules into {}",
        total,
        cabling.module_count(),
        db.partition()
    );
    Ok(())
}

fn upload(db: &mut ConfigDb, new_major: bool) -> Result<()> {
    db.update_local_caches();
    db.take_last_failure();

    db.upload_device_descriptions(new_major);
    db.upload_fed_descriptions(new_major);
    db.upload_fed_connections();
    if db.mode() == BackendMode::UsingDatabase {
        db.upload_pia_reset_descriptions();
    }
    db.upload_dcu_det_id_map();

    if let Some(failure) = db.take_last_failure() {
        bail!("Upload failed: {}", failure);
    }
    println!("Uploaded all descriptions for {}", db.partition());
    Ok(())
}
