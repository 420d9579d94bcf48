//! Binary entrypoint for the Chillbot CLI.
//!
//! Commands:
//! - `start` - run the bot with the console transport (`<user_id> <text>` per stdin line)
//! - `init` - create a starter `config.toml` and the data directory
//! - `status [--json]` - print player and ledger totals
//!
//! See the library crate docs for module-level details: `chillbot::`.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use chillbot::bot::{format, ChillBot, InboundEvent};
use chillbot::clock::SystemClock;
use chillbot::config::Config;
use chillbot::store::{BotStore, BotStoreBuilder};
use chillbot::transport::ConsoleMessenger;

#[derive(Parser)]
#[command(name = "chillbot")]
#[command(about = "Chat bot for an in-group virtual currency")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot, reading `<user_id> <text>` lines from stdin
    Start,
    /// Initialize a new configuration
    Init,
    /// Show player and ledger statistics
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = Config::load(&cli.config).await?;
            init_logging(Some(&config), cli.verbose);
            info!("Starting Chillbot v{}", env!("CARGO_PKG_VERSION"));
            run(config).await?;
        }
        Commands::Init => {
            init_logging(None, cli.verbose);
            info!("Initializing new Chillbot configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
            let cfg = Config::default();
            let store = open_store(&cfg)?;
            store.flush()?;
            info!("Initialized data directory at {}", cfg.storage.data_dir);
        }
        Commands::Status { json } => {
            let config = Config::load(&cli.config).await?;
            init_logging(Some(&config), cli.verbose);
            let store = open_store(&config)?;
            let stats = store.global_stats()?;
            let pending = store.pending_purchases()?.len();
            let scheduled = store
                .list_payments()?
                .into_iter()
                .filter(|p| !p.executed)
                .count();
            if json {
                let payload = serde_json::json!({
                    "players": stats.total_players,
                    "total_emission": stats.total_emission,
                    "average_balance": stats.average_balance,
                    "transactions": stats.total_transactions,
                    "pending_requests": pending,
                    "scheduled_payments": scheduled,
                });
                println!("{}", payload);
            } else {
                let top = store.top_players(5, true)?;
                println!("{}", format::global_stats(&stats, &top));
                println!("Pending purchase requests: {}", pending);
                println!("Scheduled payments: {}", scheduled);
            }
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<BotStore> {
    Ok(BotStoreBuilder::new(config.store_path()).open()?)
}

/// `<user_id> <text>` -> event.
fn parse_console_line(line: &str) -> Option<InboundEvent> {
    let (id, text) = line.trim().split_once(char::is_whitespace)?;
    let user_id = id.parse().ok()?;
    Some(InboundEvent::new(user_id, text.trim()))
}

async fn run(config: Config) -> Result<()> {
    let store = Arc::new(open_store(&config)?);
    let bot = Arc::new(ChillBot::new(
        &config,
        store.clone(),
        Arc::new(ConsoleMessenger::new()),
        Arc::new(SystemClock),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = tokio::spawn(bot.clone().run_background(
        Duration::from_secs(config.scheduler.tick_seconds),
        shutdown_rx,
    ));

    info!("Bot ready, reading messages from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed, shutting down");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_console_line(&line) {
                    Some(event) => bot.handle_event(event).await,
                    None => warn!("ignoring malformed input line (expected \"<user_id> <text>\")"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = background.await {
        warn!("background loop ended abnormally: {}", e);
    }
    store.flush()?;
    Ok(())
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    if let Some(file) = log_file {
        let file = std::sync::Mutex::new(file);
        // Mirror to the console only in the foreground.
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = file.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
