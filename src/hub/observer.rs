//! Observer capability and the built-in observers.
//!
//! Delivery must not block: observers either hand the event off immediately or
//! fail, and a failure gets the observer detached.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use thiserror::Error;

use crate::error::{ExecutionError, HemoError, HemoResult};

use super::events::MonitorEvent;
use super::{HubShared, ObserverId};

/// Why an event could not be handed to an observer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("observer connection closed")]
    Closed,

    #[error("observer buffer full")]
    Full,

    #[error("observer rejected event: {0}")]
    Rejected(String),

    #[error("observer panicked: {0}")]
    Panicked(String),
}

/// A live consumer of broadcast events.
pub trait Observer: Send + Sync {
    fn deliver(&self, event: &MonitorEvent) -> Result<(), DeliveryError>;
}

/// Observer backed by a bounded channel. A full or disconnected channel fails delivery.
#[derive(Debug)]
pub struct ChannelObserver {
    tx: Sender<MonitorEvent>,
}

impl ChannelObserver {
    #[must_use]
    pub const fn new(tx: Sender<MonitorEvent>) -> Self {
        Self { tx }
    }
}

impl Observer for ChannelObserver {
    fn deliver(&self, event: &MonitorEvent) -> Result<(), DeliveryError> {
        match self.tx.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DeliveryError::Full),
            Err(TrySendError::Disconnected(_)) => Err(DeliveryError::Closed),
        }
    }
}

/// Writes each event as one line of JSON.
pub struct JsonLinesObserver<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesObserver<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }
}

impl<W: Write + Send> Observer for JsonLinesObserver<W> {
    fn deliver(&self, event: &MonitorEvent) -> Result<(), DeliveryError> {
        let line = serde_json::to_string(event).map_err(|e| DeliveryError::Rejected(e.to_string()))?;
        let mut out = self.out.lock().map_err(|_| DeliveryError::Closed)?;
        writeln!(out, "{line}").map_err(|_| DeliveryError::Closed)?;
        out.flush().map_err(|_| DeliveryError::Closed)
    }
}

/// A subscription stream for hub events.
///
/// Dropping this stream detaches its observer from the hub (best effort).
#[derive(Debug)]
pub struct ObserverStream {
    observer_id: ObserverId,
    rx: Receiver<MonitorEvent>,
    hub: Weak<HubShared>,
    detached: AtomicBool,
}

impl ObserverStream {
    pub(crate) fn new(observer_id: ObserverId, rx: Receiver<MonitorEvent>, hub: Weak<HubShared>) -> Self {
        Self {
            observer_id,
            rx,
            hub,
            detached: AtomicBool::new(false),
        }
    }

    /// The observer id backing this stream.
    #[must_use]
    pub const fn observer_id(&self) -> ObserverId {
        self.observer_id
    }

    /// Explicit detach. Idempotent.
    pub fn unsubscribe(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            let _ = hub.detach(self.observer_id);
        }
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> HemoResult<MonitorEvent> {
        self.rx.recv().map_err(|_| {
            HemoError::Execution(ExecutionError::Disconnected {
                path: "observer_stream".to_string(),
            })
        })
    }

    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> HemoResult<MonitorEvent> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => HemoError::Execution(ExecutionError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }),
            RecvTimeoutError::Disconnected => HemoError::Execution(ExecutionError::Disconnected {
                path: "observer_stream".to_string(),
            }),
        })
    }

    /// Everything currently buffered, without blocking.
    pub fn drain(&self) -> Vec<MonitorEvent> {
        self.rx.try_iter().collect()
    }
}

impl Drop for ObserverStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::bounded;

    use super::*;
    use crate::source::SourceMode;

    #[test]
    fn channel_observer_reports_full_and_closed() {
        let (tx, rx) = bounded(1);
        let observer = ChannelObserver::new(tx);
        let event = MonitorEvent::connection_established(SourceMode::Simulation);

        observer.deliver(&event).unwrap();
        assert_eq!(observer.deliver(&event), Err(DeliveryError::Full));

        drop(rx);
        assert_eq!(observer.deliver(&event), Err(DeliveryError::Closed));
    }

    #[test]
    fn json_lines_observer_writes_one_line_per_event() {
        let observer = JsonLinesObserver::new(Vec::new());
        observer
            .deliver(&MonitorEvent::connection_established(SourceMode::Production))
            .unwrap();
        let out = observer.out.lock().unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"connection_established\""));
    }
}
