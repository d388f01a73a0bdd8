use std::io::Write;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use modelstore::ModelStore;
use modelstore::cli::{Cli, Command};
use modelstore::config::{Config, STORE_DIR_ENV};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let store_path = config.resolve_store_dir(cli.store, std::env::var(STORE_DIR_ENV).ok());

    info!("modelstore starting at {}", store_path.display());
    let store = ModelStore::open(&store_path).context("Failed to open model store")?;

    match cli.command {
        Command::Put { file } => {
            let bytes = std::fs::read(&file).context(format!("Failed to read {}", file.display()))?;
            let reference = store.put(&bytes)?;
            println!("{}", reference);
        }
        Command::Get { reference, output } => {
            let bytes = store.get(&reference)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &bytes).context(format!("Failed to write {}", path.display()))?;
                    eprintln!("{} Wrote {} bytes to {}", "✓".green(), bytes.len(), path.display());
                }
                None => std::io::stdout().write_all(&bytes)?,
            }
        }
        Command::Ls => {
            let refs = store.list()?;
            if refs.is_empty() {
                println!("No objects found");
            } else {
                for reference in refs {
                    println!("{}", reference);
                }
            }
        }
        Command::Verify { reference } => {
            let targets = match reference {
                Some(r) => vec![r],
                None => store.list()?,
            };
            let mut bad = 0usize;
            for reference in &targets {
                match store.verify(reference) {
                    Ok(()) => println!("{} {}", "ok".green(), reference),
                    Err(e) => {
                        bad += 1;
                        println!("{} {} ({})", "bad".red(), reference, e);
                    }
                }
            }
            if bad > 0 {
                return Err(eyre::eyre!("{} of {} objects failed verification", bad, targets.len()));
            }
        }
        Command::Stats => {
            let stats = store.stats()?;
            println!("Store: {}", store.path().display().to_string().cyan());
            println!("  Objects: {}", stats.object_count);
            println!("  Total bytes: {}", stats.total_bytes);
        }
    }

    Ok(())
}
