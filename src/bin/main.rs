use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use parking_lot::Mutex;

use ember_consensus::{BlockGenerator, GeneratorConfig};
use ember_core::NullAtEngine;
use ember_crypto::{address_from_public_key, PrivateKey};
use ember_node::{bootstrap_chain, Settings};
use ember_state::MemoryRepository;

#[derive(Parser)]
#[command(name = "ember", about = "Proof-of-stake blockchain node", version)]
struct Cli {
    /// Path to the node configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a forging key and print its seed, public key and address.
    GenerateKey,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Some(Command::GenerateKey) = cli.command {
        return generate_key();
    }

    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    run_node(settings)
}

fn generate_key() -> anyhow::Result<()> {
    let key = PrivateKey::generate();
    let public = key.public_key();
    println!("seed:       {}", key.seed_hex());
    println!("public key: {}", hex::encode(public.as_bytes()));
    println!("address:    {}", address_from_public_key(&public));
    Ok(())
}

fn run_node(settings: Settings) -> anyhow::Result<()> {
    let keys: Vec<PrivateKey> = settings
        .forging_key_seeds
        .iter()
        .map(|seed| PrivateKey::from_hex(seed))
        .collect::<Result<_, _>>()
        .context("parsing forging key seeds")?;

    let mut repo = MemoryRepository::new();
    bootstrap_chain(&mut repo, &settings.chain)?;
    let repo = Arc::new(Mutex::new(repo));

    let (publisher, forged) = mpsc::channel();
    let generator = BlockGenerator::new(
        Arc::clone(&repo),
        settings.chain.clone(),
        keys,
        Arc::new(NullAtEngine),
        GeneratorConfig {
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            error_backoff: Duration::from_secs(settings.error_backoff_secs),
        },
        Some(publisher),
    );
    let shutdown = generator.shutdown_flag();
    let generator_thread = generator.spawn();

    // Drain forged blocks for logging until stdin closes or reads "quit".
    let announcer = std::thread::spawn(move || {
        for block in forged {
            log::info!(
                "new tip at height {} ({} transaction(s), {} in fees)",
                block.height().unwrap_or(0),
                block.transaction_count(),
                block.total_fees()
            );
        }
    });

    log::info!("node running; type 'quit' to stop");
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        let read = stdin.read_line(&mut line)?;
        if read == 0 || line.trim() == "quit" {
            break;
        }
    }

    shutdown.store(true, Ordering::Relaxed);
    generator_thread
        .join()
        .map_err(|_| anyhow::anyhow!("generator thread panicked"))?;
    announcer
        .join()
        .map_err(|_| anyhow::anyhow!("announcer thread panicked"))?;
    Ok(())
}
