//! Broadcast hub for live observers.
//!
//! Publishing takes a snapshot of the observer set under a read lock, releases
//! the lock, then delivers. Attach/detach take the write lock only to mutate
//! the set, so they never race with an in-progress iteration. Observers that
//! fail delivery (including by panicking) are removed after the pass; nobody
//! else is affected.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crossbeam_channel::bounded;
use serde::{Deserialize, Serialize};

use crate::error::{panic_message, ExecutionError, HemoError, HemoResult};
use crate::source::SourceMode;

/// Event payloads.
pub mod events;
/// Observer trait and built-in observers.
pub mod observer;

pub use events::MonitorEvent;
pub use observer::{ChannelObserver, DeliveryError, JsonLinesObserver, Observer, ObserverStream};

/// Hub-assigned identifier of an attached observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObserverId(u64);

impl ObserverId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one publish pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub detached: Vec<ObserverId>,
}

fn lock_err(context: &'static str) -> HemoError {
    HemoError::internal(format!("poisoned lock: {context}"))
}

/// Delivers one event, turning a panicking observer into a delivery failure.
fn deliver_guarded(observer: &dyn Observer, event: &MonitorEvent) -> Result<(), DeliveryError> {
    panic::catch_unwind(AssertUnwindSafe(|| observer.deliver(event)))
        .unwrap_or_else(|payload| Err(DeliveryError::Panicked(panic_message(payload.as_ref()))))
}

pub(crate) struct HubShared {
    mode: SourceMode,
    next_id: AtomicU64,
    observers: RwLock<Vec<(ObserverId, Arc<dyn Observer>)>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl HubShared {
    pub(crate) fn detach(&self, id: ObserverId) -> HemoResult<bool> {
        let mut observers = self.observers.write().map_err(|_| lock_err("hub.detach"))?;
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        Ok(observers.len() != before)
    }
}

impl fmt::Debug for HubShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubShared")
            .field("mode", &self.mode)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

/// Maintains the live observer set and fans events out to it.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    shared: Arc<HubShared>,
}

impl BroadcastHub {
    /// Creates a hub announcing `mode` to attaching observers.
    #[must_use]
    pub fn new(mode: SourceMode) -> Self {
        Self {
            shared: Arc::new(HubShared {
                mode,
                next_id: AtomicU64::new(1),
                observers: RwLock::new(Vec::new()),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn mode(&self) -> SourceMode {
        self.shared.mode
    }

    /// Attaches an observer after sending it `connection_established`.
    ///
    /// The greeting is delivered before the observer joins the live set, so it
    /// is always the first event the observer sees.
    ///
    /// # Errors
    ///
    /// `DeliveryFailure` if the greeting cannot be delivered; the observer is
    /// not attached in that case.
    pub fn attach(&self, observer: Arc<dyn Observer>) -> HemoResult<ObserverId> {
        let id = ObserverId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let hello = MonitorEvent::connection_established(self.shared.mode);
        deliver_guarded(observer.as_ref(), &hello).map_err(|e| ExecutionError::DeliveryFailure {
            observer: id.0,
            reason: e.to_string(),
        })?;

        let mut observers = self.shared.observers.write().map_err(|_| lock_err("hub.attach"))?;
        observers.push((id, observer));
        tracing::info!(observer = %id, total = observers.len(), "observer attached");
        Ok(id)
    }

    /// Attaches a channel-backed observer and returns its receiving stream.
    pub fn subscribe(&self, capacity: usize) -> HemoResult<ObserverStream> {
        let (tx, rx) = bounded::<MonitorEvent>(capacity.max(1));
        let id = self.attach(Arc::new(ChannelObserver::new(tx)))?;
        Ok(ObserverStream::new(id, rx, Arc::downgrade(&self.shared)))
    }

    /// Removes an observer. Returns `false` if it was not attached.
    pub fn detach(&self, id: ObserverId) -> HemoResult<bool> {
        let removed = self.shared.detach(id)?;
        if removed {
            tracing::info!(observer = %id, "observer detached");
        }
        Ok(removed)
    }

    /// Delivers `event` to every attached observer.
    ///
    /// Observers that fail are detached; the others still receive the event.
    pub fn publish(&self, event: &MonitorEvent) -> HemoResult<PublishReport> {
        let snapshot: Vec<(ObserverId, Arc<dyn Observer>)> = {
            let observers = self.shared.observers.read().map_err(|_| lock_err("hub.publish"))?;
            observers.iter().map(|(id, o)| (*id, Arc::clone(o))).collect()
        };

        let mut report = PublishReport::default();
        for (id, observer) in snapshot {
            match deliver_guarded(observer.as_ref(), event) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(observer = %id, event = event.kind(), error = %e, "delivery failed; detaching observer");
                    report.detached.push(id);
                }
            }
        }

        if !report.detached.is_empty() {
            let mut observers = self.shared.observers.write().map_err(|_| lock_err("hub.publish"))?;
            observers.retain(|(id, _)| !report.detached.contains(id));
        }

        self.shared.delivered.fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.shared.dropped.fetch_add(report.detached.len() as u64, Ordering::Relaxed);
        Ok(report)
    }

    /// Number of attached observers.
    pub fn len(&self) -> HemoResult<usize> {
        let observers = self.shared.observers.read().map_err(|_| lock_err("hub.len"))?;
        Ok(observers.len())
    }

    pub fn is_empty(&self) -> HemoResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn observer_ids(&self) -> HemoResult<Vec<ObserverId>> {
        let observers = self.shared.observers.read().map_err(|_| lock_err("hub.observer_ids"))?;
        Ok(observers.iter().map(|(id, _)| *id).collect())
    }

    #[must_use]
    pub fn delivered_events(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped_deliveries(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::reading::{Reading, SubjectId};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<&'static str>>,
    }

    impl Observer for Recorder {
        fn deliver(&self, event: &MonitorEvent) -> Result<(), DeliveryError> {
            self.seen.lock().unwrap().push(event.kind());
            Ok(())
        }
    }

    struct Broken;

    impl Observer for Broken {
        fn deliver(&self, event: &MonitorEvent) -> Result<(), DeliveryError> {
            match event {
                MonitorEvent::ConnectionEstablished { .. } => Ok(()),
                _ => Err(DeliveryError::Closed),
            }
        }
    }

    fn reading_event() -> MonitorEvent {
        MonitorEvent::Reading(Reading::now(SubjectId::new("p1").unwrap(), 10.0, 1.0).unwrap())
    }

    #[test]
    fn attach_greets_before_returning() {
        let hub = BroadcastHub::new(SourceMode::Simulation);
        let recorder = Arc::new(Recorder::default());
        hub.attach(recorder.clone()).unwrap();
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["connection_established"]);
    }

    #[test]
    fn failing_observer_is_detached_and_others_still_served() {
        let hub = BroadcastHub::new(SourceMode::Simulation);
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        hub.attach(a.clone()).unwrap();
        let broken = hub.attach(Arc::new(Broken)).unwrap();
        hub.attach(b.clone()).unwrap();

        let first = hub.publish(&reading_event()).unwrap();
        assert_eq!(first.delivered, 2);
        assert_eq!(first.detached, vec![broken]);
        assert_eq!(hub.len().unwrap(), 2);

        let second = hub.publish(&reading_event()).unwrap();
        assert_eq!(second.delivered, 2);
        assert!(second.detached.is_empty());
        assert_eq!(a.seen.lock().unwrap().len(), 3);
        assert_eq!(b.seen.lock().unwrap().len(), 3);
        assert_eq!(hub.dropped_deliveries(), 1);
    }

    #[test]
    fn greeting_failure_rejects_attach() {
        struct Mute;
        impl Observer for Mute {
            fn deliver(&self, _event: &MonitorEvent) -> Result<(), DeliveryError> {
                Err(DeliveryError::Rejected("nope".to_string()))
            }
        }

        let hub = BroadcastHub::new(SourceMode::Production);
        let err = hub.attach(Arc::new(Mute)).unwrap_err();
        assert!(matches!(err, HemoError::Execution(ExecutionError::DeliveryFailure { .. })));
        assert!(hub.is_empty().unwrap());
    }

    #[test]
    fn dropped_stream_detaches() {
        let hub = BroadcastHub::new(SourceMode::Simulation);
        let stream = hub.subscribe(8).unwrap();
        let hello = stream.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(hello.kind(), "connection_established");
        assert_eq!(hub.len().unwrap(), 1);

        drop(stream);
        assert_eq!(hub.len().unwrap(), 0);
    }

    struct Exploding;

    impl Observer for Exploding {
        fn deliver(&self, event: &MonitorEvent) -> Result<(), DeliveryError> {
            if let MonitorEvent::Reading(_) = event {
                panic!("renderer crashed");
            }
            Ok(())
        }
    }

    #[test]
    fn panicking_observer_is_detached_like_a_failing_one() {
        let hub = BroadcastHub::new(SourceMode::Simulation);
        let before = Arc::new(Recorder::default());
        let after = Arc::new(Recorder::default());
        hub.attach(before.clone()).unwrap();
        let exploding = hub.attach(Arc::new(Exploding)).unwrap();
        hub.attach(after.clone()).unwrap();

        let report = hub.publish(&reading_event()).unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.detached, vec![exploding]);
        assert!(!hub.observer_ids().unwrap().contains(&exploding));

        hub.publish(&reading_event()).unwrap();
        assert_eq!(after.seen.lock().unwrap().len(), 3);
        assert_eq!(before.seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn panicking_greeting_rejects_attach() {
        struct PanicsOnHello;
        impl Observer for PanicsOnHello {
            fn deliver(&self, _event: &MonitorEvent) -> Result<(), DeliveryError> {
                panic!("socket gone");
            }
        }

        let hub = BroadcastHub::new(SourceMode::Simulation);
        let err = hub.attach(Arc::new(PanicsOnHello)).unwrap_err();
        assert!(matches!(err, HemoError::Execution(ExecutionError::DeliveryFailure { .. })));
        assert!(hub.is_empty().unwrap());
    }

    #[test]
    fn detach_unknown_is_false() {
        let hub = BroadcastHub::new(SourceMode::Simulation);
        assert!(!hub.detach(ObserverId(99)).unwrap());
    }
}
