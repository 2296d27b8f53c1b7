//! Bounded reader pool.
//!
//! Reading acquisition runs on dedicated threads so a lagging source cannot
//! stall the sampling loop past its timeout. A read that outlives its timeout
//! keeps its worker busy until the source returns; callers hold on to the
//! [`PendingRead`] and must not queue another read for that subject until it
//! has settled.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

use crate::error::{ExecutionError, HemoError, HemoResult};
use crate::reading::{Reading, SubjectId};
use crate::source::ReadingSource;

struct Job {
    subject: SubjectId,
    reply: Sender<Option<Reading>>,
}

/// Worker threads calling [`ReadingSource::read`].
pub struct ReaderPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl ReaderPool {
    /// Spawns `workers` reader threads sharing one bounded job queue.
    ///
    /// # Errors
    ///
    /// `Internal` if a worker thread cannot be spawned.
    pub fn start(workers: usize, queue_capacity: usize, source: Arc<dyn ReadingSource>) -> HemoResult<Self> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let source = Arc::clone(&source);
            let handle = thread::Builder::new()
                .name(format!("hemodrop-reader-{idx}"))
                .spawn(move || {
                    while let Ok(Job { subject, reply }) = rx.recv() {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| source.read(&subject)));
                        match result {
                            Ok(reading) => {
                                let _ = reply.send(reading);
                            }
                            // Dropping `reply` unanswered surfaces as a disconnect.
                            Err(_) => tracing::warn!(subject = %subject, "reading source panicked"),
                        }
                    }
                })
                .map_err(|e| HemoError::internal(format!("failed to spawn reader worker: {e}")))?;
            handles.push(handle);
        }

        Ok(Self {
            tx: Some(tx),
            workers: handles,
            queue_capacity,
        })
    }

    /// Queues a read for `subject` without waiting for it.
    pub fn submit(&self, subject: &SubjectId) -> HemoResult<PendingRead> {
        let unavailable = |reason: String| {
            HemoError::Execution(ExecutionError::SourceUnavailable {
                subject: subject.to_string(),
                reason,
            })
        };
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| unavailable("reader pool shut down".to_string()))?;

        let (reply, rx) = bounded::<Option<Reading>>(1);
        match tx.try_send(Job {
            subject: subject.clone(),
            reply,
        }) {
            Ok(()) => Ok(PendingRead {
                subject: subject.clone(),
                submitted: Instant::now(),
                rx,
            }),
            Err(TrySendError::Full(_)) => Err(unavailable(format!(
                "reader queue full (capacity {})",
                self.queue_capacity
            ))),
            Err(TrySendError::Disconnected(_)) => Err(unavailable("reader pool disconnected".to_string())),
        }
    }

    /// Reads `subject`, waiting at most `timeout`.
    pub fn read(&self, subject: &SubjectId, timeout: Duration) -> HemoResult<Option<Reading>> {
        self.submit(subject)?.join_timeout(timeout)
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.len()
    }
}

impl std::fmt::Debug for ReaderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderPool")
            .field("workers", &self.workers.len())
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl Drop for ReaderPool {
    fn drop(&mut self) {
        // Closing the queue lets idle workers exit. Workers stuck in a slow
        // source are left detached and exit once it returns.
        drop(self.tx.take());
        for handle in self.workers.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

/// A read in flight.
#[derive(Debug)]
pub struct PendingRead {
    subject: SubjectId,
    submitted: Instant,
    rx: Receiver<Option<Reading>>,
}

impl PendingRead {
    #[must_use]
    pub const fn subject(&self) -> &SubjectId {
        &self.subject
    }

    /// Waits for the reading.
    ///
    /// # Errors
    ///
    /// `Timeout` when the source is slower than `timeout`, `SourceUnavailable`
    /// when the source failed without answering.
    pub fn join_timeout(&self, timeout: Duration) -> HemoResult<Option<Reading>> {
        self.wait_until(Instant::now() + timeout)
    }

    /// Waits for the reading until `deadline`. A timed-out read stays pending
    /// and can be waited on again.
    ///
    /// # Errors
    ///
    /// As [`join_timeout`](Self::join_timeout); the reported duration runs
    /// from submission to `deadline`.
    pub fn wait_until(&self, deadline: Instant) -> HemoResult<Option<Reading>> {
        self.rx.recv_deadline(deadline).map_err(|err| match err {
            RecvTimeoutError::Timeout => {
                let waited = deadline.saturating_duration_since(self.submitted);
                HemoError::Execution(ExecutionError::Timeout {
                    duration_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                })
            }
            RecvTimeoutError::Disconnected => self.failed(),
        })
    }

    /// True while the worker has neither answered nor given up.
    ///
    /// A late answer is consumed and discarded by this check.
    #[must_use]
    pub fn is_outstanding(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Empty))
    }

    fn failed(&self) -> HemoError {
        HemoError::Execution(ExecutionError::SourceUnavailable {
            subject: self.subject.to_string(),
            reason: "source failed without a reading".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::source::SourceMode;

    struct Fixed;

    impl ReadingSource for Fixed {
        fn read(&self, subject: &SubjectId) -> Option<Reading> {
            Reading::now(subject.clone(), 10.0, 1.0).ok()
        }

        fn mode(&self) -> SourceMode {
            SourceMode::Simulation
        }
    }

    struct Slow(Duration);

    impl ReadingSource for Slow {
        fn read(&self, subject: &SubjectId) -> Option<Reading> {
            thread::sleep(self.0);
            Reading::now(subject.clone(), 10.0, 1.0).ok()
        }

        fn mode(&self) -> SourceMode {
            SourceMode::Production
        }
    }

    struct Panicking;

    impl ReadingSource for Panicking {
        fn read(&self, _subject: &SubjectId) -> Option<Reading> {
            panic!("sensor driver crashed");
        }

        fn mode(&self) -> SourceMode {
            SourceMode::Production
        }
    }

    fn subject() -> SubjectId {
        SubjectId::new("p1").unwrap()
    }

    #[test]
    fn reads_through_the_pool() {
        let pool = ReaderPool::start(2, 8, Arc::new(Fixed)).unwrap();
        let reading = pool.read(&subject(), Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(reading.cumulative_loss_ml(), 10.0);
        assert_eq!(pool.workers(), 2);
    }

    #[test]
    fn slow_source_times_out_without_blocking_caller() {
        let pool = ReaderPool::start(1, 4, Arc::new(Slow(Duration::from_millis(300)))).unwrap();
        let started = Instant::now();
        let err = pool.read(&subject(), Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, HemoError::Execution(ExecutionError::Timeout { duration_ms }) if duration_ms >= 30));
        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn panicking_source_is_unavailable_and_worker_survives() {
        let pool = ReaderPool::start(1, 4, Arc::new(Panicking)).unwrap();
        for _ in 0..2 {
            let err = pool.read(&subject(), Duration::from_secs(1)).unwrap_err();
            assert!(matches!(
                err,
                HemoError::Execution(ExecutionError::SourceUnavailable { .. })
            ));
        }
    }

    #[test]
    fn timed_out_read_stays_outstanding_until_the_source_answers() {
        let pool = ReaderPool::start(1, 4, Arc::new(Slow(Duration::from_millis(150)))).unwrap();
        let pending = pool.submit(&subject()).unwrap();
        assert!(pending.join_timeout(Duration::from_millis(10)).is_err());
        assert!(pending.is_outstanding());

        thread::sleep(Duration::from_millis(300));
        assert!(!pending.is_outstanding());
    }

    #[test]
    fn one_deadline_covers_several_reads() {
        let pool = ReaderPool::start(4, 8, Arc::new(Slow(Duration::from_millis(100)))).unwrap();
        let subjects: Vec<_> = ["a", "b", "c", "d"].iter().map(|s| SubjectId::new(*s).unwrap()).collect();
        let started = Instant::now();
        let pending: Vec<_> = subjects.iter().map(|s| pool.submit(s).unwrap()).collect();
        let deadline = started + Duration::from_secs(1);
        for (read, subject) in pending.iter().zip(&subjects) {
            assert_eq!(read.wait_until(deadline).unwrap().unwrap().subject_id(), subject);
        }
        // Reads ran side by side rather than back to back.
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[test]
    fn full_queue_is_reported() {
        let pool = ReaderPool::start(1, 1, Arc::new(Slow(Duration::from_millis(200)))).unwrap();
        let _busy = pool.submit(&subject()).unwrap();
        // Let the worker pick up the first job so the queue slot frees.
        thread::sleep(Duration::from_millis(50));
        let _queued = pool.submit(&subject()).unwrap();
        let err = pool.submit(&subject()).unwrap_err();
        assert!(err.is_retryable());
    }
}
