use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use crate::feed::alert::Alert;
use crate::feed::snapshot::AuxProvider;
use crate::feed::source::AlertSource;
use crate::foundation::error::{AlertcastError, AlertcastResult};
use crate::render::frame::AuxImage;

/// Where alert fetches run relative to the frame loop.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshMode {
    /// Fetch on the loop thread; a slow fetch delays that tick.
    Inline,
    /// Fetch on a worker thread; ticks keep their cadence while a fetch is in flight.
    #[default]
    Background,
}

/// Result of one refresh cycle.
#[derive(Debug)]
pub struct RefreshOutcome {
    /// New alert list, or why there is none.
    pub alerts: AlertcastResult<Vec<Alert>>,
    /// Aux image result; `None` when no provider is configured.
    pub aux: Option<AlertcastResult<Option<AuxImage>>>,
}

/// Fetch alerts, then refresh the aux image.
///
/// Panics inside either call are caught and reported as errors so the loop never sees them.
pub fn refresh_once(
    source: &mut dyn AlertSource,
    aux: Option<&mut dyn AuxProvider>,
) -> RefreshOutcome {
    let alerts = catch_unwind(AssertUnwindSafe(|| source.fetch())).unwrap_or_else(|panic| {
        Err(AlertcastError::fetch(format!(
            "alert source panicked: {}",
            panic_message(panic.as_ref())
        )))
    });
    let aux = aux.map(|p| {
        catch_unwind(AssertUnwindSafe(|| p.refresh())).unwrap_or_else(|panic| {
            Err(AlertcastError::fetch(format!(
                "aux provider panicked: {}",
                panic_message(panic.as_ref())
            )))
        })
    });
    RefreshOutcome { alerts, aux }
}

pub(crate) fn aux_mut(aux: &mut Option<Box<dyn AuxProvider>>) -> Option<&mut dyn AuxProvider> {
    aux.as_mut().map(|p| p.as_mut() as &mut dyn AuxProvider)
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Runs refreshes on a dedicated thread, one at a time.
///
/// The loop calls [`RefreshWorker::request`] when the cache is stale and
/// [`RefreshWorker::poll`] every tick. At most one fetch is in flight; requests made while one is
/// running are ignored.
pub struct RefreshWorker {
    requests: Option<mpsc::SyncSender<()>>,
    results: mpsc::Receiver<RefreshOutcome>,
    in_flight: bool,
    handle: Option<JoinHandle<()>>,
}

impl RefreshWorker {
    /// Move `source` and `aux` onto a new worker thread.
    pub fn spawn(
        mut source: Box<dyn AlertSource>,
        mut aux: Option<Box<dyn AuxProvider>>,
    ) -> AlertcastResult<Self> {
        let (req_tx, req_rx) = mpsc::sync_channel::<()>(1);
        let (res_tx, res_rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("alertcast-refresh".to_owned())
            .spawn(move || {
                while req_rx.recv().is_ok() {
                    let outcome = refresh_once(source.as_mut(), aux_mut(&mut aux));
                    if res_tx.send(outcome).is_err() {
                        break;
                    }
                }
                tracing::debug!("refresh worker exiting");
            })
            .map_err(|e| AlertcastError::config(format!("failed to spawn refresh worker: {e}")))?;
        Ok(Self {
            requests: Some(req_tx),
            results: res_rx,
            in_flight: false,
            handle: Some(handle),
        })
    }

    /// Whether a fetch is currently running.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Ask for a refresh. Returns `Ok(false)` if one is already in flight.
    pub fn request(&mut self) -> AlertcastResult<bool> {
        if self.in_flight {
            return Ok(false);
        }
        let Some(tx) = self.requests.as_ref() else {
            return Err(AlertcastError::fetch("refresh worker is shut down"));
        };
        match tx.try_send(()) {
            Ok(()) => {
                self.in_flight = true;
                Ok(true)
            }
            Err(mpsc::TrySendError::Full(())) => Ok(false),
            Err(mpsc::TrySendError::Disconnected(())) => {
                self.requests = None;
                Err(AlertcastError::fetch("refresh worker exited"))
            }
        }
    }

    /// Take a finished refresh, if any. Never blocks.
    pub fn poll(&mut self) -> Option<RefreshOutcome> {
        match self.results.try_recv() {
            Ok(outcome) => {
                self.in_flight = false;
                Some(outcome)
            }
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                self.in_flight = false;
                None
            }
        }
    }
}

impl Drop for RefreshWorker {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop after any running fetch. The fetch is
        // bounded by its own timeout, so only join a thread that has already finished.
        self.requests = None;
        if let Some(h) = self.handle.take()
            && h.is_finished()
        {
            let _ = h.join();
        }
    }
}

/// Refresh strategy owned by the scheduler.
pub(crate) enum Refresher {
    Inline {
        source: Box<dyn AlertSource>,
        aux: Option<Box<dyn AuxProvider>>,
    },
    Background(RefreshWorker),
}

impl Refresher {
    pub(crate) fn new(
        mode: RefreshMode,
        source: Box<dyn AlertSource>,
        aux: Option<Box<dyn AuxProvider>>,
    ) -> AlertcastResult<Self> {
        Ok(match mode {
            RefreshMode::Inline => Self::Inline { source, aux },
            RefreshMode::Background => Self::Background(RefreshWorker::spawn(source, aux)?),
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/refresh.rs"]
mod tests;
