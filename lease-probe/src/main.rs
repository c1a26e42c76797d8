//! Command-line entry point for lease-probe.
//!
//! ```sh
//! lease-probe send --count 3 --wait 0
//! lease-probe read --lockrenew 5 --messagehandling LockExpire
//! lease-probe demo --count 2 --messagehandling Abandon
//! ```
//!
//! Queue settings come from `--settings <file.json>` and the
//! `SERVICEBUS_CONNECTION_STRING` / `SERVICEBUS_QUEUE_NAME` environment
//! variables (a `.env` file is honoured).

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use lease_probe::config::Settings;
use lease_probe::logging::init_tracing;
use lease_probe::observe::log_queue_events;
use lease_probe::{
    DispositionPolicy, EnqueueLoop, ProbeError, ReceiveSession, SessionConfig, SessionSummary,
    TriggerConfig, TriggerHost,
};
use lease_queue::backend::memory::{BrokerConfig, LeaseReaper, MemoryBroker};
use lease_queue::{Clock, QueueClient, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "lease-probe")]
#[command(about = "Send and read queue messages to see how peek-lock leases behave")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON settings file holding the queue connection string and name
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Lease monitor tick period in milliseconds
    #[arg(long, global = true, default_value_t = 2000, value_parser = clap::value_parser!(u64).range(1..))]
    tick_ms: u64,

    /// Lock duration of the in-process broker, in seconds
    #[arg(long, global = true, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    lock_duration: u64,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send messages to the in-process queue; they are dropped on exit, use `demo` to read them back
    Send {
        /// Count of messages to add to the queue
        #[arg(long, short = 'c')]
        count: u32,

        /// Wait interval (in milliseconds) between message sends
        #[arg(long, short = 'w', default_value_t = 10)]
        wait: u64,
    },
    /// Read messages from the in-process queue, which starts empty; use `demo` to send and read in one run
    ///
    /// Each message is handled as Complete, Abandon, LockExpire or DeadLetter.
    Read {
        /// Duration (in seconds) the lock is renewed for
        #[arg(long, short = 'l', default_value_t = 60)]
        lockrenew: u64,

        /// How to treat messages retrieved from the queue
        #[arg(long, short = 'm')]
        messagehandling: DispositionPolicy,
    },
    /// Send, then read, against one in-process queue
    Demo {
        #[arg(long, short = 'c', default_value_t = 1)]
        count: u32,

        #[arg(long, short = 'w', default_value_t = 10)]
        wait: u64,

        #[arg(long, short = 'l', default_value_t = 60)]
        lockrenew: u64,

        #[arg(long, short = 'm')]
        messagehandling: DispositionPolicy,
    },
    /// Complete each message, dead-lettering blank payloads
    Trigger,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    if let Err(e) = run_cli(cli).await {
        error!("Error: {:#}", e);
        let code = e.downcast_ref::<ProbeError>().map(ProbeError::exit_code).unwrap_or(1);
        process::exit(code);
    }
}

/// Resolve settings, open the queue and dispatch the subcommand
async fn run_cli(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.settings.as_deref())?;
    let queue = settings.queue_settings()?;

    let broker = queue.connect(BrokerConfig {
        lock_duration: Duration::from_secs(cli.lock_duration),
        ..BrokerConfig::default()
    })?;
    info!("Connected to queue '{}'", queue.queue_name);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let reaper = LeaseReaper::new(broker.clone()).spawn(shutdown_rx.clone());
    let events = tokio::spawn(log_queue_events(broker.event_stream(), shutdown_rx.clone()));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let client: Arc<dyn QueueClient> = Arc::new(broker.clone());
    let tick_period = Duration::from_millis(cli.tick_ms);

    match cli.command {
        Commands::Send { count, wait } => {
            EnqueueLoop::new(client, clock, queue.queue_name.as_str())
                .run(count, Duration::from_millis(wait))
                .await?;
            warn!(
                "{} messages remain on the in-process queue and are dropped on exit",
                broker.active_count()
            );
        }
        Commands::Read {
            lockrenew,
            messagehandling,
        } => {
            let config = SessionConfig::new(messagehandling, Duration::from_secs(lockrenew))
                .with_tick_period(tick_period);
            let summary = ReceiveSession::new(client, clock, config).run(shutdown_rx).await?;
            summarize(&summary);
        }
        Commands::Demo {
            count,
            wait,
            lockrenew,
            messagehandling,
        } => {
            EnqueueLoop::new(client.clone(), clock.clone(), queue.queue_name.as_str())
                .run(count, Duration::from_millis(wait))
                .await?;

            let config = SessionConfig::new(messagehandling, Duration::from_secs(lockrenew))
                .with_tick_period(tick_period);
            let summary = ReceiveSession::new(client, clock, config).run(shutdown_rx).await?;
            summarize(&summary);

            let dead = broker.dead_letters();
            if !dead.is_empty() {
                info!("{} messages in the dead-letter queue", dead.len());
            }
        }
        Commands::Trigger => {
            let summary = TriggerHost::new(client, clock, TriggerConfig::default())
                .run(shutdown_rx)
                .await?;
            info!(
                "Triggered {} messages: {} completed, {} dead-lettered, {} failed",
                summary.completed + summary.dead_lettered + summary.failed,
                summary.completed,
                summary.dead_lettered,
                summary.failed
            );
        }
    }

    reaper.abort();
    events.abort();
    Ok(())
}

fn summarize(summary: &SessionSummary) {
    for report in summary.recent() {
        info!(
            "Message {}: {:?} after {} ticks ({} renewals)",
            report.message_id, report.outcome, report.ticks, report.renewals
        );
    }
    info!(
        "Handled {} deliveries: {} completed, {} abandoned, {} dead-lettered, {} expired, {} cancelled, {} failed",
        summary.total(),
        summary.completed,
        summary.abandoned,
        summary.dead_lettered,
        summary.expired,
        summary.cancelled,
        summary.failed
    );
}
