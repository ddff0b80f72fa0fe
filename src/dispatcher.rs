//! Command dispatcher
//!
//! Single writer to the active sink. Commands arrive over a one-slot mailbox
//! and are written immediately; sustained commands are then re-sent on a
//! shared ticker until a one-shot command for the same controller replaces
//! them or their repeat budget runs out.
//!
//! ```text
//!   router ──► mailbox (1) ──► dispatcher ──► sink
//!                                  ▲
//!                        ticker ───┘ (only while the repeat table is non-empty)
//! ```

use std::collections::BTreeMap;
use std::future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::sink::MessageSink;

/// Maximum number of transmissions of one sustained command, first write included
pub const MAX_REPEAT: u32 = 50;

/// Default delay between two transmissions of a sustained command
pub const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Commands the router may have in flight before it blocks
pub const MAILBOX_CAPACITY: usize = 1;

/// A control change to write, optionally held until superseded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub controller: u8,
    pub value: u8,
    pub sustain: bool,
}

impl Command {
    /// Written once
    pub fn once(controller: u8, value: u8) -> Self {
        Self {
            controller,
            value,
            sustain: false,
        }
    }

    /// Written now and repeated on every tick
    pub fn sustained(controller: u8, value: u8) -> Self {
        Self {
            controller,
            value,
            sustain: true,
        }
    }
}

/// Repeat cadence and budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub repeat_interval: Duration,
    pub repeat_budget: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            repeat_interval: DEFAULT_REPEAT_INTERVAL,
            repeat_budget: MAX_REPEAT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RepeatEntry {
    value: u8,
    remaining: u32,
}

/// Sustained commands keyed by controller, at most one per controller
#[derive(Debug, Default)]
pub struct RepeatTable {
    entries: BTreeMap<u8, RepeatEntry>,
}

impl RepeatTable {
    /// Start (or restart) repeating `value` on `controller`
    pub fn arm(&mut self, controller: u8, value: u8, budget: u32) {
        self.entries.insert(
            controller,
            RepeatEntry {
                value,
                remaining: budget,
            },
        );
    }

    /// Forget any repeat for `controller`
    pub fn cancel(&mut self, controller: u8) -> bool {
        self.entries.remove(&controller).is_some()
    }

    /// Advance one tick.
    ///
    /// Returns the `(controller, value)` pairs to re-send. Entries that are
    /// down to their last credit are dropped instead of re-sent.
    pub fn tick(&mut self) -> Vec<(u8, u8)> {
        let mut due = Vec::with_capacity(self.entries.len());
        self.entries.retain(|&controller, entry| {
            if entry.remaining > 1 {
                trace!(
                    "Controller: {}, Value: {}, Repeat-Counter: {}",
                    controller,
                    entry.value,
                    entry.remaining
                );
                due.push((controller, entry.value));
                entry.remaining -= 1;
                true
            } else {
                false
            }
        });
        due
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Owns the sink and the repeat table; lives inside the dispatcher task
struct Dispatcher {
    sink: Box<dyn MessageSink>,
    repeats: RepeatTable,
    settings: DispatchSettings,
}

impl Dispatcher {
    fn write(&mut self, controller: u8, value: u8) {
        if let Err(e) = self.sink.send(controller, value) {
            warn!("Failed to write controller {}: {}", controller, e);
        }
    }

    fn on_command(&mut self, cmd: Command, ticker: &mut Option<Interval>) {
        debug!(
            "Controller: {}, Value: {}, Repeat: {}",
            cmd.controller, cmd.value, cmd.sustain
        );
        self.write(cmd.controller, cmd.value);

        if cmd.sustain {
            self.repeats
                .arm(cmd.controller, cmd.value, self.settings.repeat_budget);
            *ticker = Some(new_ticker(self.settings.repeat_interval));
        } else {
            self.repeats.cancel(cmd.controller);
            if self.repeats.is_empty() {
                *ticker = None;
            }
        }
    }

    fn on_tick(&mut self, ticker: &mut Option<Interval>) {
        for (controller, value) in self.repeats.tick() {
            self.write(controller, value);
        }
        if self.repeats.is_empty() {
            trace!("Repeat table empty, ticker paused");
            *ticker = None;
        }
    }

    async fn run(
        mut self,
        mut mailbox: mpsc::Receiver<Command>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        info!("Dispatcher started");
        let mut ticker: Option<Interval> = None;

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    debug!("Dispatcher shutdown requested");
                    break;
                }

                cmd = mailbox.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd, &mut ticker),
                    None => {
                        debug!("Mailbox closed");
                        break;
                    }
                },

                _ = next_tick(&mut ticker) => self.on_tick(&mut ticker),
            }
        }

        if !self.repeats.is_empty() {
            debug!("Dropping {} pending repeat(s)", self.repeats.len());
        }
        info!("Dispatcher stopped");
        // Sink dropped here, closing the connection
    }
}

/// Ticker whose first tick is one period from now
fn new_ticker(period: Duration) -> Interval {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Resolves on the next tick, or never while the ticker is paused
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        },
        None => future::pending::<()>().await,
    }
}

/// Handle to a running dispatcher task
pub struct DispatcherHandle {
    mailbox: mpsc::Sender<Command>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Spawn the dispatcher on the current tokio runtime. The sink is owned
    /// by the task from here on and dropped when it ends.
    pub fn spawn(sink: Box<dyn MessageSink>, settings: DispatchSettings) -> Self {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let dispatcher = Dispatcher {
            sink,
            repeats: RepeatTable::default(),
            settings,
        };
        let task = tokio::spawn(dispatcher.run(mailbox_rx, shutdown_rx));

        Self {
            mailbox: mailbox_tx,
            shutdown: shutdown_tx,
            task,
        }
    }

    /// Sender side of the mailbox, for producers on other threads
    pub fn mailbox(&self) -> mpsc::Sender<Command> {
        self.mailbox.clone()
    }

    /// Queue a command, waiting while the mailbox is full
    pub async fn send(&self, cmd: Command) -> Result<(), mpsc::error::SendError<Command>> {
        self.mailbox.send(cmd).await
    }

    /// Stop the task and wait until the sink has been released
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!("Dispatcher task ended abnormally: {}", e);
        }
    }
}
