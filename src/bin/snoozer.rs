//! CLI binary for snoozer.
//!
//! `snoozer run` is the long-lived daemon that fires snoozes. The other
//! subcommands edit the shared store and exit; the daemon's overdue check
//! picks their changes up.

use anyhow::Context;
use chrono::{DateTime, FixedOffset, TimeZone, Weekday};
use clap::{Parser, Subcommand};
use snoozer::action::SystemOpener;
use snoozer::clock::SystemClock;
use snoozer::scheduler::records::{OccurrenceId, RecurrenceRule, TimeOfDay, WeekdaySet};
use snoozer::scheduler::{FireOutcome, Preset};
use snoozer::{
    JsonFileStore, ReconciliationEngine, SnoozeConfig, SnoozeRunner, SnoozeService, SnoozeTime,
    SourceRef, TokioTimers,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Snoozer: reopen URLs later, once or on a schedule.
#[derive(Parser)]
#[command(name = "snoozer", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "SNOOZER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the snooze daemon until interrupted.
    Run,

    /// Snooze a URL once.
    Snooze {
        url: String,
        #[arg(long)]
        title: Option<String>,
        /// Absolute time (RFC 3339, e.g. 2026-10-16T09:00:00+02:00).
        #[arg(long, conflicts_with_all = ["in_minutes", "preset"])]
        at: Option<DateTime<FixedOffset>>,
        /// Minutes from now.
        #[arg(long, conflicts_with = "preset")]
        in_minutes: Option<u32>,
        /// One of: one-hour, 5pm-today, 6am-tomorrow, 6am-saturday, 9am-monday, 30-days.
        #[arg(long)]
        preset: Option<Preset>,
    },

    /// Reopen a URL every week on the given days.
    Weekly {
        url: String,
        #[arg(long)]
        title: Option<String>,
        /// Comma-separated weekdays (e.g. mon,wed,fri).
        #[arg(long, value_delimiter = ',', required = true)]
        days: Vec<Weekday>,
        /// Time of day, HH:MM.
        #[arg(long)]
        time: TimeOfDay,
    },

    /// Reopen a URL every month on the given day.
    Monthly {
        url: String,
        #[arg(long)]
        title: Option<String>,
        /// Day of month (1-31); short months use their last day.
        #[arg(long)]
        day: u8,
        /// Time of day, HH:MM.
        #[arg(long)]
        time: TimeOfDay,
    },

    /// List pending snoozes and schedules.
    List,

    /// Reopen a pending snooze now.
    Wake { id: String },

    /// Delete a snooze or a schedule. A recurring occurrence is skipped.
    Cancel { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = SnoozeConfig::load(cli.config.as_deref())?;

    // Only the daemon writes a log file; the guard must outlive main's work.
    let _log_guard = init_tracing(matches!(cli.command, Command::Run))?;

    let tz = config.scheduler.time_zone()?;
    let store = Arc::new(JsonFileStore::new(config.store.resolved_path()));
    let (timers, fired_rx) = TokioTimers::new(tokio::runtime::Handle::current());
    let engine = Arc::new(ReconciliationEngine::new(
        store,
        Arc::new(timers),
        Arc::new(SystemOpener::new(config.opener.command.clone())),
        Arc::new(SystemClock),
        tz,
    ));
    let service = SnoozeService::new(Arc::clone(&engine));

    match cli.command {
        Command::Run => {
            let shutdown = CancellationToken::new();
            let runner = SnoozeRunner::new(engine, fired_rx)
                .with_overdue_check_minutes(config.scheduler.overdue_period_minutes());
            let handle = runner.spawn(shutdown.clone());
            info!(store = %config.store.resolved_path().display(), "snoozer daemon started");

            tokio::signal::ctrl_c()
                .await
                .context("cannot listen for ctrl-c")?;
            shutdown.cancel();
            handle.await.context("snooze runner panicked")?;
        }
        Command::Snooze {
            url,
            title,
            at,
            in_minutes,
            preset,
        } => {
            let when = match (at, in_minutes, preset) {
                (Some(at), _, _) => SnoozeTime::At(at.timestamp_millis()),
                (_, Some(minutes), _) => {
                    SnoozeTime::At(engine.now_ms() + i64::from(minutes) * 60_000)
                }
                (_, _, Some(preset)) => SnoozeTime::Preset(preset),
                _ => anyhow::bail!("one of --at, --in-minutes or --preset is required"),
            };
            let occurrence = service.snooze(&source(url, title), when).await?;
            println!(
                "{}  {}",
                occurrence.id,
                format_local(&tz, occurrence.fires_at)
            );
        }
        Command::Weekly {
            url,
            title,
            days,
            time,
        } => {
            let rule = RecurrenceRule::Weekly {
                days: WeekdaySet::from_days(&days),
                time,
            };
            let (schedule, occurrence) = service.snooze_recurring(&source(url, title), rule).await?;
            println!(
                "{}  {}  next {}",
                schedule.id,
                schedule.rule,
                format_local(&tz, occurrence.fires_at)
            );
        }
        Command::Monthly {
            url,
            title,
            day,
            time,
        } => {
            let rule = RecurrenceRule::Monthly { day, time };
            let (schedule, occurrence) = service.snooze_recurring(&source(url, title), rule).await?;
            println!(
                "{}  {}  next {}",
                schedule.id,
                schedule.rule,
                format_local(&tz, occurrence.fires_at)
            );
        }
        Command::List => {
            let pending = service.list_pending().await?;
            if pending.occurrences.is_empty() && pending.schedules.is_empty() {
                println!("Nothing snoozed.");
            }
            for occurrence in &pending.occurrences {
                let kind = if occurrence.is_recurring() { "recurring" } else { "once" };
                println!(
                    "{}  {}  {:<9}  {}",
                    occurrence.id,
                    format_local(&tz, occurrence.fires_at),
                    kind,
                    occurrence.title.as_deref().unwrap_or(&occurrence.url)
                );
            }
            for schedule in &pending.schedules {
                println!(
                    "{}  {}  {}",
                    schedule.id,
                    schedule.rule,
                    schedule.title.as_deref().unwrap_or(&schedule.url)
                );
            }
        }
        Command::Wake { id } => {
            let id = OccurrenceId::parse(&id)
                .ok_or_else(|| anyhow::anyhow!("'{id}' is not a snooze id"))?;
            match service.wake_now(&id).await? {
                FireOutcome::Performed { occurrence, next } => {
                    println!("Opened {}", occurrence.url);
                    if let Some(next) = next {
                        println!("Next: {}", format_local(&tz, next.fires_at));
                    }
                }
                FireOutcome::Orphaned(occurrence) => {
                    println!("Discarded {} (its schedule was deleted)", occurrence.id);
                }
                FireOutcome::AlreadyClaimed => {}
            }
        }
        Command::Cancel { id } => {
            service.cancel(&id).await?;
            println!("Cancelled {id}");
        }
    }

    Ok(())
}

fn source(url: String, title: Option<String>) -> SourceRef {
    SourceRef {
        tab_id: None,
        url,
        title,
    }
}

fn format_local<Z: TimeZone>(tz: &Z, epoch_ms: i64) -> String
where
    Z::Offset: std::fmt::Display,
{
    tz.timestamp_millis_opt(epoch_ms)
        .single()
        .map(|at| at.format("%a %Y-%m-%d %H:%M %Z").to_string())
        .unwrap_or_else(|| epoch_ms.to_string())
}

/// Stderr logging for every command; the daemon also logs to a daily file.
fn init_tracing(
    daemon: bool,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let default_filter = if daemon { "snoozer=info" } else { "snoozer=warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if !daemon {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return Ok(None);
    }

    let logs_dir = snoozer::paths::logs_dir();
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("cannot create log directory {}", logs_dir.display()))?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&logs_dir, "snoozer.log"));
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();
    Ok(Some(guard))
}
