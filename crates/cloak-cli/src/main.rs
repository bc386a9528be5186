mod cli;
mod config;
mod content;
mod storage;

use crate::cli::{Command, ConfigCommand};
use clap::Parser;
use cloak_core::CryptoMode;
use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Entry point wiring the CLI to managed storage and the keychain-backed engine.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command.unwrap_or(Command::List { json: false }) {
        Command::List { json } => content::list(&*storage::open_store(&config)?, json)?,
        Command::Add { paths } => content::add(&*storage::open_store(&config)?, &paths)?,
        Command::Remove { names } => content::remove(&*storage::open_store(&config)?, &names)?,
        Command::Encrypt(selection) => run_batch(&config, &selection, CryptoMode::Encrypt).await?,
        Command::Decrypt(selection) => run_batch(&config, &selection, CryptoMode::Decrypt).await?,
        Command::Wipe { yes } => content::wipe(&*storage::open_store(&config)?, yes)?,
        Command::Health => run_health_check(&config).await?,
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
    }

    Ok(())
}

fn init_tracing() {
    // RUST_LOG wins; otherwise info.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("cloak {}", env!("CARGO_PKG_VERSION"));
}

async fn run_batch(
    config: &config::Config,
    selection: &cli::Selection,
    mode: CryptoMode,
) -> Result<()> {
    let store = storage::open_store(config)?;
    let orchestrator = storage::orchestrator(config, store);
    let engine = storage::production_engine(config);
    content::transform(&orchestrator, &engine, selection, mode).await
}

/// Round-trips a sample file through the keychain-backed engine in a scratch directory.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let engine = storage::production_engine(config);
    content::run_engine_health(&engine, config).await?;
    println!("Engine: ok");
    println!("Content dir: {}", storage::content_dir(config)?.display());
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
