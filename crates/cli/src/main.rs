//! agora: terminal client for the debate backend.
//!
//! Streams a live debate into the terminal, lists saved sessions and shows
//! stored transcripts. Ctrl-C while streaming cancels the session cleanly.

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use agora_client::{DebateClient, RemoteSessionSink};
use agora_core::config::load_dotenv;
use agora_core::{Config, DebateRequest, Locale, Message};
use agora_session::{HistoryCache, SessionController, SessionOutcome, SessionState};

// ── CLI ─────────────────────────────────────────────────────────────

/// Terminal client for the debate-visualization backend.
#[derive(Parser, Debug)]
#[command(name = "agora", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream a debate and print the transcript as it arrives.
    Run {
        /// The debate topic.
        topic: String,

        /// Number of rounds (default from AGORA_MAX_ROUNDS).
        #[arg(long)]
        rounds: Option<u32>,

        /// Debate language, "zh" or "en" (default from AGORA_LANGUAGE).
        #[arg(long, value_parser = Locale::from_str)]
        language: Option<Locale>,
    },
    /// List saved debates (recent by default, paginated with --page).
    History {
        #[arg(long)]
        page: Option<u32>,

        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },
    /// Show the stored transcript of one debate.
    Show { id: String },
    /// Check backend liveness.
    Health,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Run {
            topic,
            rounds,
            language,
        } => run_debate(&config, topic, rounds, language).await,
        Command::History { page, page_size } => show_history(&config, page, page_size).await,
        Command::Show { id } => show_debate(&config, &id).await,
        Command::Health => check_health(&config).await,
    }
}

// ── run ─────────────────────────────────────────────────────────────

/// Tracks what has already been printed so the observer only emits deltas.
#[derive(Default)]
struct Printed {
    messages: usize,
    status: String,
}

fn print_updates(tracker: &Mutex<Printed>, state: &SessionState) {
    let mut tracker = tracker.lock().unwrap();
    if state.status() != tracker.status {
        tracker.status = state.status().to_string();
        eprintln!("· {}", tracker.status);
    }
    for message in &state.transcript()[tracker.messages..] {
        print_message(message);
    }
    tracker.messages = state.transcript().len();
}

fn print_message(message: &Message) {
    match &message.round_label {
        Some(label) => println!("[{} · {}]", message.node, label),
        None => println!("[{}]", message.node),
    }
    println!("{}\n", message.text);
}

async fn run_debate(
    config: &Config,
    topic: String,
    rounds: Option<u32>,
    language: Option<Locale>,
) -> anyhow::Result<()> {
    let client = DebateClient::from_config(&config.api);
    let history = Arc::new(HistoryCache::new(config.session.history_limit));
    let sink = Arc::new(RemoteSessionSink::new(client.clone(), history));

    let tracker = Arc::new(Mutex::new(Printed::default()));
    let observer_tracker = tracker.clone();
    let mut controller = SessionController::new(Arc::new(client), sink)
        .with_connect_timeout(Duration::from_secs(config.session.connect_timeout_secs))
        .with_observer(move |state| print_updates(&observer_tracker, state));

    let request = DebateRequest::new(topic)
        .with_max_rounds(rounds.unwrap_or(config.session.max_rounds))
        .with_language(language.unwrap_or(config.session.language));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping debate");
            ctrl_c.cancel();
        }
    });

    match controller.run(&request, cancel).await {
        Ok(SessionOutcome::Completed { rounds_completed }) => {
            if let Some(latency) = controller.state().slow_connection() {
                eprintln!("(first byte after {:.1}s)", latency.as_secs_f64());
            }
            println!(
                "Debate finished: {} messages, {} round(s).",
                controller.state().transcript().len(),
                rounds_completed
            );
            Ok(())
        }
        Ok(SessionOutcome::Failed { reason }) => Err(anyhow::anyhow!("debate failed: {reason}")),
        // Cancellation and timeout are informational, not failures.
        Err(e) if e.is_cancellation() => {
            println!("{}", controller.state().status());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

// ── history / show / health ─────────────────────────────────────────

async fn show_history(config: &Config, page: Option<u32>, page_size: u32) -> anyhow::Result<()> {
    let client = DebateClient::from_config(&config.api);
    let entries = match page {
        Some(page) => {
            let listing = client.debates_paginated(page, page_size).await?;
            println!(
                "page {}/{} ({} total)",
                listing.page,
                (listing.total as u32).div_ceil(listing.page_size.max(1)),
                listing.total
            );
            listing.data
        }
        None => client.recent_debates(config.session.history_limit).await?,
    };

    if entries.is_empty() {
        println!("no saved debates");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {}  ({} rounds)  {}",
            entry.id,
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.rounds_completed,
            entry.topic
        );
    }
    Ok(())
}

async fn show_debate(config: &Config, id: &str) -> anyhow::Result<()> {
    let client = DebateClient::from_config(&config.api);
    let Some(detail) = client.debate_detail(id).await? else {
        anyhow::bail!("no debate with id {id}");
    };

    println!("{} ({} rounds)\n", detail.topic, detail.rounds_completed);
    for message in detail.messages {
        let node = message
            .node
            .map(|n| n.to_string())
            .unwrap_or_else(|| message.kind.clone());
        match &message.round_label {
            Some(label) => println!("[{node} · {label}]"),
            None => println!("[{node}]"),
        }
        println!("{}\n", message.content);
    }
    Ok(())
}

async fn check_health(config: &Config) -> anyhow::Result<()> {
    let client = DebateClient::from_config(&config.api);
    if client.health().await {
        println!("ok ({})", client.base_url());
        Ok(())
    } else {
        println!("unreachable ({})", client.base_url());
        std::process::exit(1);
    }
}
