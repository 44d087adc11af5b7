//! passcomm-import - converts Password Commander CSV exports into KeePass
//! databases.

mod config;
mod dump;
mod encoding;

use anyhow::{Context, Result};
use clap::Parser;
use passcomm_core::{database, Document};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use config::Config;

/// Convert a Password Commander CSV export into a KeePass database
#[derive(Parser, Debug)]
#[command(name = "passcomm-import", version, about, long_about = None)]
struct Args {
    /// Path to the Password Commander export
    #[arg(value_name = "EXPORT")]
    input: PathBuf,

    /// Path of the KeePass database to write
    #[arg(short, long, value_name = "FILE", required_unless_present = "dump")]
    output: Option<PathBuf>,

    /// Master password for the new database
    #[arg(short, long, env = "PASSCOMM_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Text encoding of the export (overrides config)
    #[arg(short, long, value_name = "LABEL")]
    encoding: Option<String>,

    /// Print the decoded tree instead of writing a database
    #[arg(long)]
    dump: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("passcomm_import=info".parse()?)
                .add_directive("passcomm_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(args.config.clone())?;

    // Override encoding if provided via CLI
    if let Some(encoding) = &args.encoding {
        tracing::info!("Overriding encoding from CLI: {}", encoding);
        config.encoding = encoding.clone();
    }

    run(&args, &config)
}

fn run(args: &Args, config: &Config) -> Result<()> {
    let doc = load_export(&args.input, config)?;

    if args.dump {
        let stdout = std::io::stdout();
        dump::write_tree(&doc, &mut stdout.lock())?;
        return Ok(());
    }

    let output = args
        .output
        .as_deref()
        .context("An output path is required unless --dump is given")?;
    let password = args
        .password
        .as_deref()
        .context("A master password is required (--password or PASSCOMM_PASSWORD)")?;

    let db = database::assemble(&doc, &config.assemble)
        .with_context(|| format!("Failed to import {}", args.input.display()))?;
    database::save(&db, output, password)?;

    tracing::info!("Wrote {}", output.display());
    Ok(())
}

/// Read, decode and parse the export at `path`.
fn load_export(path: &Path, config: &Config) -> Result<Document> {
    tracing::info!("Reading export {}", path.display());
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read export: {}", path.display()))?;

    let text = encoding::decode_text(&bytes, &config.encoding)?;

    passcomm_core::parse_with(&text, &config.decode).with_context(|| {
        format!(
            "{} is not a valid Password Commander export or is corrupt",
            path.display()
        )
    })
}
