//! Main entry point for the battlemaster matchmaking engine
//!
//! Wires the engine together with its default collaborators (static
//! templates, in-memory arena team store, always-online sessions) and runs
//! the tick loop until a shutdown signal arrives. Production embeddings
//! usually link against the library instead and supply their own
//! collaborators.

use anyhow::Result;
use battlemaster::battleground::StaticTemplateProvider;
use battlemaster::config::AppConfig;
use battlemaster::manager::QueueManager;
use battlemaster::notify::NullNotificationSink;
use battlemaster::rating::InMemoryArenaTeamStore;
use battlemaster::session::AlwaysOnline;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

/// Battlemaster - battleground and arena matchmaking engine
#[derive(Parser)]
#[command(
    name = "battlemaster",
    version,
    about = "Battleground and arena queue matchmaking/lifecycle engine",
    long_about = "Battlemaster keeps faction-balanced battleground queues, rating-windowed \
                 arena pairing and battleground instance lifecycles ticking. This binary runs \
                 the engine standalone with in-memory collaborators; real deployments embed \
                 the library and plug in their own session, template and rating backends."
)]
struct Args {
    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Tick period override
    #[arg(long, value_name = "MS", help = "Override the scheduler tick period")]
    tick_period_ms: Option<u64>,

    /// Relax battleground minimums to one player per side
    #[arg(long, help = "Relax battleground minimum player requirements (test mode)")]
    battleground_testing: bool,

    /// Relax arena minimums to one player per side
    #[arg(long, help = "Relax arena minimum player requirements (test mode)")]
    arena_testing: bool,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting the engine"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Load configuration from the environment and apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = AppConfig::from_env()?;

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }
    if args.debug {
        config.service.log_level = "debug".to_string();
    }
    if let Some(period) = args.tick_period_ms {
        config.service.tick_period_ms = period;
    }
    if args.battleground_testing {
        config.queue.battleground_testing = true;
    }
    if args.arena_testing {
        config.queue.arena_testing = true;
    }

    Ok(config)
}

fn display_startup_banner(config: &AppConfig) {
    info!("Battlemaster matchmaking engine");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Tick period: {}ms", config.service.tick_period_ms);
    info!(
        "   Invite accept wait: {}ms",
        config.queue.invite_accept_wait_ms
    );
    info!(
        "   Invitation policy: {:?}",
        config.queue.invitation_policy
    );
    info!(
        "   Max rating difference: {}",
        config.queue.max_rating_difference
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    display_startup_banner(&config);

    if args.dry_run {
        info!("Configuration validation successful");
        info!("Dry run completed - exiting without starting the engine");
        return Ok(());
    }

    let manager = Arc::new(QueueManager::new(
        Arc::new(config),
        Arc::new(NullNotificationSink),
        Arc::new(AlwaysOnline),
        Arc::new(InMemoryArenaTeamStore::new()),
        Arc::new(StaticTemplateProvider::with_defaults()),
    )?);

    manager.run().await?;

    info!("Battlemaster matchmaking engine stopped");
    Ok(())
}
