// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Lingua-Sync command line
//!
//! Inspect and update the local learner's progress, and manage the remote
//! session, without the graphical app.

use clap::{Parser, Subcommand};
use lingua_sync::config::Config;
use lingua_sync::models::{NarrationMode, ProgressDocument, ThemeMode};
use lingua_sync::SyncEngine;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lingua-sync", about = "Learning progress sync tool", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show progress and sync state
    Status,
    /// Create an account
    SignUp { email: String, password: String },
    /// Sign in with e-mail and password
    SignIn { email: String, password: String },
    /// Sign out and forget the local session
    SignOut,
    /// Show the signed-in user
    Whoami,
    /// Award experience points
    AwardXp { amount: u64 },
    /// Count a completed activity
    Complete {
        activity: String,
        #[arg(long, default_value_t = 1)]
        by: u64,
    },
    /// Mark a word as learned
    Learn { word: String },
    /// Record a missed word
    Miss { word: String },
    /// Set narration language (it, fr, en)
    Narration { mode: NarrationMode },
    /// Set theme (light, dark, system)
    Theme { theme: ThemeMode },
    /// Reset all progress
    Reset,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport<'a> {
    backend: String,
    sync: String,
    level: u64,
    xp_in_level: u64,
    words_learned: usize,
    progress: &'a ProgressDocument,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::info!(backend = ?config.backend, remote = config.has_remote(), "Starting lingua-sync");

    let engine = SyncEngine::from_config(config).await?;
    let progress = &engine.progress;

    let document = match cli.command {
        Command::Status => {
            let doc = progress.load_progress().await?;
            let report = StatusReport {
                backend: format!("{:?}", progress.backend_kind()),
                sync: format!("{:?}", progress.sync_status()),
                level: doc.level(),
                xp_in_level: doc.xp_in_level(),
                words_learned: doc.words_learned_count(),
                progress: &doc,
            };
            print_json(&report)?;
            return Ok(());
        }
        Command::SignUp { email, password } => {
            let session = engine.session()?.sign_up(&email, &password).await?;
            print_json(&session.user)?;
            return Ok(());
        }
        Command::SignIn { email, password } => {
            let session = engine.session()?.sign_in(&email, &password).await?;
            print_json(&session.user)?;
            return Ok(());
        }
        Command::SignOut => {
            engine.session()?.sign_out().await;
            return Ok(());
        }
        Command::Whoami => {
            let identity = engine.session()?.get_current_identity().await;
            print_json(&identity)?;
            return Ok(());
        }
        Command::AwardXp { amount } => progress.award_xp(amount).await?,
        Command::Complete { activity, by } => progress.increment_completion(&activity, by).await?,
        Command::Learn { word } => progress.mark_learned(&word).await?,
        Command::Miss { word } => progress.mark_error(&word).await?,
        Command::Narration { mode } => progress.set_narration_mode(mode).await?,
        Command::Theme { theme } => progress.set_theme_mode(theme).await?,
        Command::Reset => progress.reset_all().await?,
    };

    progress.flush(true).await?;
    print_json(&document)?;
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize structured JSON logging on stderr.
fn init_logging() -> anyhow::Result<()> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lingua_sync=debug".parse()?)
                .add_directive(tracing::Level::INFO.into()),
        )
        .with(format)
        .init();
    Ok(())
}
