//! Session controller
//!
//! A session ties one open sink to the device: a reader thread polling the
//! ShuttleXpress, a router thread translating its events, and a dispatcher
//! task writing to the sink. Selecting another sink tears the whole chain
//! down before building a new one, so a sink never has two writers.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, Sender};
use tracing::{error, info, warn};

use crate::dispatcher::{DispatchSettings, DispatcherHandle};
use crate::error::{Result, SessionError};
use crate::router::run_router;
use crate::shuttle::decoder::{run_reader, ReaderExit};
use crate::shuttle::{Decoder, ReportSource};
use crate::sink::SinkProvider;

/// Default upper bound on one blocking device read
pub const DEFAULT_READ_SLICE: Duration = Duration::from_millis(250);

/// Tunables for the pipeline of every session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub dispatch: DispatchSettings,
    /// Reads return at least this often so a stop request is noticed
    pub read_slice: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            dispatch: DispatchSettings::default(),
            read_slice: DEFAULT_READ_SLICE,
        }
    }
}

/// The device and its decoder while no reader owns them
struct DeviceSlot {
    source: Box<dyn ReportSource>,
    decoder: Decoder,
}

struct ActiveSession {
    sink_name: String,
    stop: Sender<()>,
    reader: JoinHandle<ReaderExit>,
    router: JoinHandle<()>,
    dispatcher: DispatcherHandle,
}

/// Owns the device and, while running, the pipeline feeding one sink
pub struct Session {
    device: Option<DeviceSlot>,
    provider: Arc<dyn SinkProvider>,
    settings: SessionSettings,
    active: Option<ActiveSession>,
}

impl Session {
    pub fn new(
        source: Box<dyn ReportSource>,
        provider: Arc<dyn SinkProvider>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            device: Some(DeviceSlot {
                source,
                decoder: Decoder::new(),
            }),
            provider,
            settings,
            active: None,
        }
    }

    /// Switch the device over to the sink matching `sink_name`.
    ///
    /// Any running session is stopped and its sink closed first. If the new
    /// sink cannot be opened the error is returned and the device stays idle:
    /// there is no fallback to the previous sink.
    pub async fn start(&mut self, sink_name: &str) -> Result<()> {
        if let Some(e) = self.stop().await {
            warn!("Previous session ended with: {}", e);
        }

        let Some(device) = self.device.take() else {
            error!("{}", SessionError::DeviceUnavailable);
            return Err(SessionError::DeviceUnavailable);
        };

        let sink = match self.provider.open(sink_name) {
            Ok(sink) => sink,
            Err(e) => {
                self.device = Some(device);
                error!("{}", e);
                return Err(e);
            },
        };

        let dispatcher = DispatcherHandle::spawn(sink, self.settings.dispatch);
        let (events_tx, events_rx) = bounded(0);
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let read_slice = self.settings.read_slice;
        let reader_stop = stop_rx.clone();
        let reader = std::thread::spawn(move || {
            run_reader(
                device.source,
                device.decoder,
                events_tx,
                reader_stop,
                read_slice,
            )
        });

        let mailbox = dispatcher.mailbox();
        let router = std::thread::spawn(move || run_router(events_rx, stop_rx, mailbox));

        info!("Session started on '{}'", sink_name);
        self.active = Some(ActiveSession {
            sink_name: sink_name.to_string(),
            stop: stop_tx,
            reader,
            router,
            dispatcher,
        });
        Ok(())
    }

    /// Tear down the running session, if any.
    ///
    /// Returns once the sink is closed and the reader has handed the device
    /// back, which may take up to one read slice. Yields the read error that
    /// ended the reader, if that is why it stopped.
    pub async fn stop(&mut self) -> Option<SessionError> {
        let ActiveSession {
            sink_name,
            stop,
            reader,
            router,
            dispatcher,
        } = self.active.take()?;

        info!("Stopping session on '{}'", sink_name);
        drop(stop);
        dispatcher.shutdown().await;

        let joined =
            tokio::task::spawn_blocking(move || (reader.join(), router.join())).await;

        match joined {
            Ok((Ok(exit), router_result)) => {
                if router_result.is_err() {
                    error!("Router thread panicked");
                }
                self.device = Some(DeviceSlot {
                    source: exit.source,
                    decoder: exit.decoder,
                });
                info!("Session on '{}' stopped", sink_name);
                exit.error
            },
            _ => {
                error!("Reader thread panicked, ShuttleXpress released");
                Some(SessionError::DeviceUnavailable)
            },
        }
    }

    /// Tear down a session whose reader has ended on its own (read failure).
    ///
    /// Returns the failure; returns None while the reader is healthy or no
    /// session is running.
    pub async fn reap(&mut self) -> Option<SessionError> {
        let finished = self
            .active
            .as_ref()
            .is_some_and(|active| active.reader.is_finished());
        if !finished {
            return None;
        }

        warn!("ShuttleXpress reader ended, stopping session");
        self.stop().await
    }

    /// Name of the sink the session writes to, if running
    pub fn active_sink(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.sink_name.as_str())
    }

    /// True while a reader is polling the device
    pub fn is_reading(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.reader.is_finished())
    }

    /// False once the device handle has been lost to a panicked reader
    pub fn has_device(&self) -> bool {
        self.device.is_some() || self.active.is_some()
    }
}
