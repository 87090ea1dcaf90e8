//! Named timers.
//!
//! [`TimerFacility`] is the contract the engine needs: create a one-shot or
//! periodic timer under a name, look it up, cancel it. Fired timers are
//! reported by name to whoever owns the facility; timing is best-effort.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

/// When a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSpec {
    /// Once, at/after this epoch-millisecond instant.
    At { fire_at_ms: i64 },
    /// Repeatedly, every `period_minutes`, first firing one period from now.
    Every { period_minutes: u32 },
}

/// A live timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerInfo {
    pub name: String,
    pub spec: TimerSpec,
}

/// Timer/alarm facility.
pub trait TimerFacility: Send + Sync {
    /// Register a timer, replacing any existing timer with the same name.
    fn create(&self, name: &str, spec: TimerSpec);

    /// Look up a live timer.
    fn get(&self, name: &str) -> Option<TimerInfo>;

    /// Cancel a timer. Returns whether one was live; absence is not an error.
    fn cancel(&self, name: &str) -> bool;
}

struct TimerEntry {
    spec: TimerSpec,
    generation: u64,
    task: AbortHandle,
}

#[derive(Default)]
struct TimerTable {
    entries: HashMap<String, TimerEntry>,
    next_generation: u64,
}

/// Tokio-backed timers; fired names arrive on the receiver returned by [`TokioTimers::new`].
pub struct TokioTimers {
    table: Arc<Mutex<TimerTable>>,
    fired_tx: mpsc::UnboundedSender<String>,
    runtime: tokio::runtime::Handle,
}

impl TokioTimers {
    /// Create a facility that spawns its timers on `runtime`.
    #[must_use]
    pub fn new(runtime: tokio::runtime::Handle) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let timers = Self {
            table: Arc::new(Mutex::new(TimerTable::default())),
            fired_tx,
            runtime,
        };
        (timers, fired_rx)
    }

    /// Number of live timers.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.table).entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn spawn_one_shot(&self, name: String, fire_at_ms: i64, generation: u64) -> AbortHandle {
        let delay = delay_until(fire_at_ms);
        let table = Arc::clone(&self.table);
        let tx = self.fired_tx.clone();
        self.runtime
            .spawn(async move {
                tokio::time::sleep(delay).await;
                {
                    let mut table = lock(&table);
                    let current = table.entries.get(&name).map(|e| e.generation);
                    if current != Some(generation) {
                        return;
                    }
                    table.entries.remove(&name);
                }
                debug!(timer = %name, "timer fired");
                let _ = tx.send(name);
            })
            .abort_handle()
    }

    fn spawn_periodic(&self, name: String, period_minutes: u32) -> AbortHandle {
        let period = Duration::from_secs(u64::from(period_minutes.max(1)) * 60);
        let tx = self.fired_tx.clone();
        self.runtime
            .spawn(async move {
                let start = tokio::time::Instant::now() + period;
                let mut interval = tokio::time::interval_at(start, period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    debug!(timer = %name, "periodic timer fired");
                    if tx.send(name.clone()).is_err() {
                        return;
                    }
                }
            })
            .abort_handle()
    }
}

impl TimerFacility for TokioTimers {
    fn create(&self, name: &str, spec: TimerSpec) {
        // Held across spawn + insert so an immediately-due task cannot look
        // itself up before its entry exists.
        let mut table = lock(&self.table);
        table.next_generation += 1;
        let generation = table.next_generation;
        let task = match spec {
            TimerSpec::At { fire_at_ms } => self.spawn_one_shot(name.to_owned(), fire_at_ms, generation),
            TimerSpec::Every { period_minutes } => self.spawn_periodic(name.to_owned(), period_minutes),
        };
        let replaced = table.entries.insert(
            name.to_owned(),
            TimerEntry {
                spec,
                generation,
                task,
            },
        );
        if let Some(old) = replaced {
            old.task.abort();
        }
    }

    fn get(&self, name: &str) -> Option<TimerInfo> {
        lock(&self.table).entries.get(name).map(|entry| TimerInfo {
            name: name.to_owned(),
            spec: entry.spec,
        })
    }

    fn cancel(&self, name: &str) -> bool {
        match lock(&self.table).entries.remove(name) {
            Some(entry) => {
                entry.task.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        for (_, entry) in lock(&self.table).entries.drain() {
            entry.task.abort();
        }
    }
}

fn lock(table: &Mutex<TimerTable>) -> std::sync::MutexGuard<'_, TimerTable> {
    table.lock().unwrap_or_else(|e| e.into_inner())
}

/// Wall-clock delay until `fire_at_ms`, zero if already past.
fn delay_until(fire_at_ms: i64) -> Duration {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let remaining = fire_at_ms.saturating_sub(now_ms).max(0);
    Duration::from_millis(u64::try_from(remaining).unwrap_or(0))
}
