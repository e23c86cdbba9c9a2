use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};

use unvault::assets::{self, DEFAULT_ASSET_PREFIX};
use unvault::{find_config_file, symbols, Patcher, UnvaultConfig};

#[derive(Parser)]
#[command(name = "unvault")]
#[command(about = "Recovers vaulted string constants in decompiled smali trees", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new unvault configuration file
    Init {
        /// Path to create the configuration file (default: current directory)
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },
    /// Analyse and patch a decompiled smali tree
    Patch {
        /// Root of the smali tree
        root: PathBuf,
        /// Configuration file (default: searched from the tree root upwards)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Compute the report without writing any file
        #[arg(long)]
        dry_run: bool,
        /// Write the JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Check that a replacement native library exports the same functions
    Verify {
        original: PathBuf,
        replacement: PathBuf,
    },
    /// Mirror asset manifest entries under the prefix a native binary expects
    Assets {
        binary: PathBuf,
        manifest: PathBuf,
        #[arg(long, default_value = DEFAULT_ASSET_PREFIX)]
        prefix: String,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path } => {
            init_config(path)?;
        }
        Commands::Patch {
            root,
            config,
            dry_run,
            report,
        } => {
            patch_tree(&root, config, dry_run, report)?;
        }
        Commands::Verify {
            original,
            replacement,
        } => {
            symbols::verify_files(&original, &replacement)
                .context("Replacement library is not symbol-compatible")?;
        }
        Commands::Assets {
            binary,
            manifest,
            prefix,
        } => {
            let added = assets::reconcile_files(&binary, &manifest, &prefix)?;
            if added == 0 {
                info!("✓ Asset manifest already matches the binary");
            }
        }
    }

    Ok(())
}

fn init_config(path: PathBuf) -> Result<()> {
    info!("Initializing unvault configuration...");

    let config_path = if path.is_dir() {
        path.join("unvault.json")
    } else {
        path
    };

    if config_path.exists() {
        warn!("Configuration file already exists!");
        return Ok(());
    }

    let config_json = serde_json::to_string_pretty(&UnvaultConfig::template())?;
    std::fs::write(&config_path, config_json)?;

    info!("✓ Created configuration file: {}", config_path.display());
    Ok(())
}

fn patch_tree(
    root: &Path,
    config: Option<PathBuf>,
    dry_run: bool,
    report_path: Option<PathBuf>,
) -> Result<()> {
    let config = match config.or_else(|| find_config_file(root)) {
        Some(path) => {
            info!("→ Using configuration: {}", path.display());
            UnvaultConfig::load(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => {
            info!("→ No configuration found, using defaults");
            UnvaultConfig::default()
        }
    };

    if dry_run {
        info!("→ Dry run, no files will be written");
    }

    let report = Patcher::new(config)
        .dry_run(dry_run)
        .run(root)
        .with_context(|| format!("Failed to patch {}", root.display()))?;
    report.log_summary();

    if let Some(path) = report_path {
        std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
        info!("✓ Report written to {}", path.display());
    }

    Ok(())
}
