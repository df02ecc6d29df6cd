//! CLI for Pullwatch
//!
//! Subcommands:
//! - `serve`: run the dashboard WebSocket server
//! - `pull`: pull once and print pending messages as JSON lines
//! - `topics`: list topics with their subscription health
//! - `publish`: publish a single message
//! - `logs`: print one page of function logs as JSON lines
//! - `functions`: list the functions offered for log filtering

use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tracing::{error, info};

use pullwatch::ack::{AckOutcome, Acknowledger};
use pullwatch::broker::{self, BrokerClient};
use pullwatch::config::{Settings, load_config};
use pullwatch::lease::LeaseTimer;
use pullwatch::logs::{self, LogQuery, LogSource};
use pullwatch::scheduler::{PullPolicy, PullScheduler};
use pullwatch::store;
use pullwatch::target::Target;
use pullwatch::transport::websocket::start_websocket_server;
use pullwatch::utils::error::{LogsError, Result};
use pullwatch::utils::logging;

#[derive(Parser)]
#[command(name = "pullwatch", version)]
enum Command {
    /// Start the dashboard WebSocket server
    Serve,
    /// Pull once from a subscription and print pending messages as JSON lines
    Pull {
        subscription: String,
        /// Maximum number of messages to request
        #[arg(long, default_value_t = 10)]
        max: usize,
        /// Acknowledge every message whose lease is still valid
        #[arg(long)]
        ack: bool,
    },
    /// List topics and their subscription counts
    Topics,
    /// Publish one message to a topic
    Publish { topic: String, payload: String },
    /// Print one page of function logs as JSON lines
    Logs {
        /// `region/name` of the function
        #[arg(long)]
        function: Option<String>,
        #[arg(long)]
        severity: Option<String>,
        #[arg(long)]
        search: Option<String>,
        /// Only entries from the last N minutes
        #[arg(long)]
        since_minutes: Option<i64>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        page_token: Option<String>,
    },
    /// List the functions offered for log filtering
    Functions,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&config.log.level);

    if let Err(e) = run(cmd, config).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(cmd: Command, config: Settings) -> Result<()> {
    let broker = broker::from_settings(&config.broker)?;
    let log_source = logs::from_settings(&config)?;

    match cmd {
        Command::Serve => run_server(broker, log_source, &config).await,
        Command::Pull {
            subscription,
            max,
            ack,
        } => run_pull(broker, &config, subscription, max, ack).await,
        Command::Topics => {
            for topic in broker.list_topics().await? {
                println!("{}", serde_json::to_string(&topic)?);
            }
            Ok(())
        }
        Command::Publish { topic, payload } => {
            let message_id = broker.publish(&topic, &payload).await?;
            info!(topic = topic.as_str(), "Published {message_id}");
            println!("{message_id}");
            Ok(())
        }
        Command::Logs {
            function,
            severity,
            search,
            since_minutes,
            limit,
            page_token,
        } => {
            let source = log_source.ok_or(LogsError::Disabled)?;
            let query = LogQuery {
                start: since_minutes
                    .and_then(chrono::TimeDelta::try_minutes)
                    .and_then(|d| Utc::now().checked_sub_signed(d)),
                function,
                severity,
                search,
                page_size: limit,
                page_token,
                ..LogQuery::default()
            };
            let page = source.entries(&query).await?;
            for entry in &page.entries {
                println!("{}", serde_json::to_string(entry)?);
            }
            if let Some(token) = page.next_page_token {
                info!("More entries available, pass --page-token {token}");
            }
            Ok(())
        }
        Command::Functions => {
            let source = log_source.ok_or(LogsError::Disabled)?;
            for function in source.functions() {
                println!("{}", serde_json::to_string(&function)?);
            }
            Ok(())
        }
    }
}

async fn run_server(
    broker: Arc<dyn BrokerClient>,
    log_source: Option<Arc<dyn LogSource>>,
    config: &Settings,
) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);

    tokio::select! {
        result = start_websocket_server(addr, broker, log_source, config.session()) => {
            result?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

async fn run_pull(
    broker: Arc<dyn BrokerClient>,
    config: &Settings,
    subscription: String,
    max: usize,
    ack: bool,
) -> Result<()> {
    let settings = config.session();
    let store = store::shared();
    let target = Arc::new(Target::new(Some(subscription)));
    let policy = PullPolicy {
        max_messages: max.max(1),
        ..settings.pull
    };

    let scheduler = PullScheduler::new(broker.clone(), store.clone(), target.clone(), policy);
    let outcome = scheduler.request_pull().await?;
    info!(?outcome, "Pull finished");

    let messages = store::lock(&store).query(|_| true).to_vec();
    for message in &messages {
        println!("{}", serde_json::to_string(message)?);
    }
    if !ack {
        return Ok(());
    }

    let lease = LeaseTimer::new(settings.lease_window);
    let acknowledger = Acknowledger::new(broker, store, target);
    for message in messages {
        if !lease.state_of(&message, Utc::now()).is_eligible() {
            info!(id = message.id.as_str(), "Lease expired, skipping");
            continue;
        }
        match acknowledger.acknowledge(&message.ack_id).await? {
            AckOutcome::Acknowledged { id } => info!(id = id.as_str(), "Acknowledged"),
            other => info!(id = message.id.as_str(), ?other, "Not acknowledged"),
        }
    }
    Ok(())
}
