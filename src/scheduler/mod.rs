//! Background sampling loop.
//!
//! One thread walks the active sessions at a fixed rate. Each cycle queues a
//! read for every active session on the [`ReaderPool`], then collects them
//! against a single deadline and feeds the results to the engine. A session
//! whose previous read is still stuck in the source is not queued again until
//! that read settles, so one lagging subject holds at most one reader worker.
//! Failures for one session are logged and do not affect the others. A failure
//! of the cycle itself (including a panic) is a `CycleFault`: it is logged, the
//! loop backs off and then resumes. The loop only exits when stopped.

/// Reader worker pool with per-read timeouts.
pub mod reader;

pub use reader::{PendingRead, ReaderPool};

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;

use crate::config::SchedulerConfig;
use crate::engine::{IngestOutcome, MonitorEngine};
use crate::error::{panic_message, ExecutionError, HemoError, HemoResult, ValidationError};
use crate::reading::Reading;
use crate::session::{MonitoringSession, SessionId};
use crate::source::ReadingSource;

/// Tally of one sampling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Active sessions at the start of the cycle.
    pub sessions: usize,
    pub sampled: usize,
    /// Sessions whose source had no data.
    pub skipped: usize,
    pub failed: usize,
    pub alerts: usize,
}

/// Drives sampling cycles for an engine.
pub struct SessionScheduler {
    engine: Arc<MonitorEngine>,
    reader: ReaderPool,
    config: SchedulerConfig,
    /// Reads that missed an earlier cycle's deadline, by session.
    stuck: Mutex<HashMap<SessionId, PendingRead>>,
}

impl SessionScheduler {
    /// Scheduler using the engine's scheduler configuration.
    pub fn new(engine: Arc<MonitorEngine>, source: Arc<dyn ReadingSource>) -> HemoResult<Self> {
        let config = engine.config().scheduler.clone();
        Self::with_config(engine, source, config)
    }

    /// # Errors
    ///
    /// `InvalidConfig` for a zero interval or timeout, `Internal` when reader
    /// threads cannot be spawned.
    pub fn with_config(
        engine: Arc<MonitorEngine>,
        source: Arc<dyn ReadingSource>,
        config: SchedulerConfig,
    ) -> HemoResult<Self> {
        config.validate()?;
        if source.mode() != engine.mode() {
            tracing::warn!(
                source_mode = %source.mode(),
                engine_mode = %engine.mode(),
                "reading source mode differs from engine mode"
            );
        }
        let reader = ReaderPool::start(config.reader_workers, config.reader_queue_capacity, source)?;
        Ok(Self {
            engine,
            reader,
            config,
            stuck: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Samples every session that is active when the cycle starts.
    ///
    /// All reads are queued up front and share one deadline, so the cycle
    /// takes at most one source timeout no matter how many sessions lag.
    /// Per-session failures are counted in the report, not returned.
    ///
    /// # Errors
    ///
    /// Only when the session table itself cannot be read.
    pub fn run_cycle(&self) -> HemoResult<CycleReport> {
        let sessions = self.engine.sessions().active()?;
        let mut report = CycleReport {
            sessions: sessions.len(),
            ..CycleReport::default()
        };

        // Taken out for the cycle; a panic mid-cycle only forgets stuck reads.
        let mut stuck = std::mem::take(&mut *self.stuck.lock().unwrap_or_else(PoisonError::into_inner));
        stuck.retain(|id, read| sessions.iter().any(|s| s.session_id == *id) && read.is_outstanding());

        let deadline = Instant::now() + self.config.source_timeout();
        let queued: Vec<_> = sessions
            .iter()
            .map(|session| {
                let read = match stuck.remove(&session.session_id) {
                    Some(previous) => Err(previous),
                    None => Ok(self.reader.submit(&session.subject_id)),
                };
                (session, read)
            })
            .collect();

        for (session, read) in queued {
            let result = match read {
                Ok(Ok(pending)) => match pending.wait_until(deadline) {
                    Ok(reading) => self.ingest(session, reading),
                    Err(e) => {
                        if matches!(e, HemoError::Execution(ExecutionError::Timeout { .. })) {
                            stuck.insert(session.session_id, pending);
                        }
                        Err(e)
                    }
                },
                Ok(Err(e)) => Err(e),
                Err(previous) => {
                    stuck.insert(session.session_id, previous);
                    Err(HemoError::Execution(ExecutionError::SourceUnavailable {
                        subject: session.subject_id.to_string(),
                        reason: "previous read still in flight".to_string(),
                    }))
                }
            };
            tally(&mut report, session, result);
        }

        *self.stuck.lock().unwrap_or_else(PoisonError::into_inner) = stuck;
        Ok(report)
    }

    fn ingest(&self, session: &MonitoringSession, reading: Option<Reading>) -> HemoResult<Option<IngestOutcome>> {
        let Some(reading) = reading else {
            return Ok(None);
        };
        if reading.subject_id() != &session.subject_id {
            return Err(HemoError::Validation(ValidationError::SubjectMismatch {
                expected: session.subject_id.to_string(),
                actual: reading.subject_id().to_string(),
            }));
        }
        self.engine.ingest_sampled(session.session_id, reading).map(Some)
    }

    /// Moves the scheduler onto its own thread.
    ///
    /// The first cycle runs immediately; later ones follow every sampling
    /// interval.
    pub fn spawn(self) -> HemoResult<SchedulerHandle> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let stats = Arc::new(SchedulerStats::default());
        let thread_stats = Arc::clone(&stats);
        let thread = thread::Builder::new()
            .name("hemodrop-scheduler".to_string())
            .spawn(move || drive(&self, &shutdown_rx, &thread_stats))
            .map_err(|e| HemoError::internal(format!("failed to spawn scheduler thread: {e}")))?;

        Ok(SchedulerHandle {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
            stats,
        })
    }
}

impl std::fmt::Debug for SessionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionScheduler")
            .field("reader", &self.reader)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn tally(report: &mut CycleReport, session: &MonitoringSession, result: HemoResult<Option<IngestOutcome>>) {
    match result {
        Ok(Some(outcome)) => {
            report.sampled += 1;
            if outcome.alert.is_some() {
                report.alerts += 1;
            }
        }
        Ok(None) => {
            report.skipped += 1;
            tracing::debug!(session = %session.session_id, subject = %session.subject_id, "no reading available");
        }
        Err(e) => {
            report.failed += 1;
            tracing::warn!(
                session = %session.session_id,
                subject = %session.subject_id,
                error = %e,
                "session sample failed"
            );
        }
    }
}

#[derive(Debug, Default)]
struct SchedulerStats {
    cycles: AtomicU64,
    faults: AtomicU64,
}

fn drive(scheduler: &SessionScheduler, shutdown: &Receiver<()>, stats: &SchedulerStats) {
    let interval = scheduler.config.sampling_interval();
    let backoff = scheduler.config.fault_backoff();
    tracing::info!(interval_ms = scheduler.config.sampling_interval_ms, "scheduler started");

    loop {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| scheduler.run_cycle()));
        let fault = match outcome {
            Ok(Ok(report)) => {
                stats.cycles.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    sessions = report.sessions,
                    sampled = report.sampled,
                    skipped = report.skipped,
                    failed = report.failed,
                    alerts = report.alerts,
                    "sampling cycle complete"
                );
                None
            }
            Ok(Err(e)) => Some(ExecutionError::CycleFault { reason: e.to_string() }),
            Err(payload) => Some(ExecutionError::CycleFault {
                reason: panic_message(payload.as_ref()),
            }),
        };

        // Successful cycles keep a fixed rate; a fault waits the full backoff.
        let next = match fault {
            Some(fault) => {
                stats.faults.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %fault, backoff_ms = scheduler.config.fault_backoff_ms, "sampling cycle fault");
                Instant::now() + backoff
            }
            None => started + interval,
        };

        match shutdown.recv_deadline(next) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::info!("scheduler stopped");
}

/// Handle to a running scheduler thread. Dropping it stops the loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    stats: Arc<SchedulerStats>,
}

impl SchedulerHandle {
    /// Completed cycles so far.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.stats.cycles.load(Ordering::Relaxed)
    }

    /// Cycle faults so far.
    #[must_use]
    pub fn faults(&self) -> u64 {
        self.stats.faults.load(Ordering::Relaxed)
    }

    /// Stops the loop and waits for the thread. A cycle in progress finishes first.
    pub fn stop(mut self) -> HemoResult<()> {
        self.shutdown_and_join()
    }

    fn shutdown_and_join(&mut self) -> HemoResult<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.try_send(());
        }
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| HemoError::internal("scheduler thread panicked")),
            None => Ok(()),
        }
    }

    /// Waits up to `timeout` for the cycle counter to reach `cycles`.
    ///
    /// Returns whether it did.
    pub fn wait_for_cycles(&self, cycles: u64, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while self.cycles() < cycles {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_and_join() {
            tracing::error!(error = %e, "scheduler shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::reading::{Reading, SubjectId};
    use crate::session::SessionState;
    use crate::source::SourceMode;

    /// Replays a fixed script of losses per call.
    struct Scripted {
        losses: Mutex<Vec<f64>>,
    }

    impl ReadingSource for Scripted {
        fn read(&self, subject: &SubjectId) -> Option<Reading> {
            let mut losses = self.losses.lock().unwrap();
            if losses.is_empty() {
                return None;
            }
            let loss = losses.remove(0);
            Reading::now(subject.clone(), loss, 5.0).ok()
        }

        fn mode(&self) -> SourceMode {
            SourceMode::Simulation
        }
    }

    fn subject() -> SubjectId {
        SubjectId::new("p1").unwrap()
    }

    fn scheduler(losses: Vec<f64>) -> (Arc<MonitorEngine>, SessionScheduler) {
        let engine = Arc::new(MonitorEngine::default());
        let source = Arc::new(Scripted {
            losses: Mutex::new(losses),
        });
        let scheduler = SessionScheduler::new(Arc::clone(&engine), source).unwrap();
        (engine, scheduler)
    }

    #[test]
    fn cycle_samples_active_sessions_and_updates_rollups() {
        let (engine, scheduler) = scheduler(vec![50.0, 300.0]);
        let session = engine.start_session(&subject()).unwrap();

        let first = scheduler.run_cycle().unwrap();
        assert_eq!(first.sampled, 1);
        assert_eq!(first.alerts, 0);
        let second = scheduler.run_cycle().unwrap();
        assert_eq!(second.alerts, 1);

        let stored = engine.session(session).unwrap();
        assert_eq!(stored.reading_count, 2);
        assert_eq!(stored.max_loss_seen, 300.0);
        assert_eq!(stored.max_severity_seen, crate::severity::SeverityLevel::Moderate);
    }

    #[test]
    fn missing_reading_is_skipped_without_side_effects() {
        let (engine, scheduler) = scheduler(Vec::new());
        let session = engine.start_session(&subject()).unwrap();

        let report = scheduler.run_cycle().unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(engine.ledger().len(&subject()).unwrap(), 0);
        assert_eq!(engine.session(session).unwrap().reading_count, 0);
    }

    #[test]
    fn stopped_sessions_are_not_sampled() {
        let (engine, scheduler) = scheduler(vec![10.0, 20.0]);
        let session = engine.start_session(&subject()).unwrap();
        engine.stop_session(session).unwrap();

        let report = scheduler.run_cycle().unwrap();
        assert_eq!(report.sessions, 0);
        assert_eq!(engine.session(session).unwrap().state, SessionState::Stopped);
    }

    #[test]
    fn spawned_loop_runs_until_stopped() {
        let engine = Arc::new(MonitorEngine::default());
        let source = Arc::new(Scripted {
            losses: Mutex::new(vec![10.0; 100]),
        });
        let config = SchedulerConfig {
            sampling_interval_ms: 10,
            ..SchedulerConfig::default()
        };
        engine.start_session(&subject()).unwrap();
        let handle = SessionScheduler::with_config(Arc::clone(&engine), source, config)
            .unwrap()
            .spawn()
            .unwrap();

        assert!(handle.wait_for_cycles(3, Duration::from_secs(5)));
        handle.stop().unwrap();
        assert!(engine.ledger().len(&subject()).unwrap() >= 3);
    }

    /// Lags only for the subjects it was built with.
    struct LagsFor {
        slow: Vec<SubjectId>,
        delay: Duration,
    }

    impl ReadingSource for LagsFor {
        fn read(&self, subject: &SubjectId) -> Option<Reading> {
            if self.slow.contains(subject) {
                thread::sleep(self.delay);
            }
            Reading::now(subject.clone(), 20.0, 1.0).ok()
        }

        fn mode(&self) -> SourceMode {
            SourceMode::Simulation
        }
    }

    #[test]
    fn cycle_duration_does_not_stretch_the_period() {
        let engine = Arc::new(MonitorEngine::default());
        let p1 = subject();
        engine.start_session(&p1).unwrap();
        let source = Arc::new(LagsFor {
            slow: vec![p1],
            delay: Duration::from_millis(80),
        });
        let config = SchedulerConfig {
            sampling_interval_ms: 100,
            source_timeout_ms: 1_000,
            ..SchedulerConfig::default()
        };
        let handle = SessionScheduler::with_config(Arc::clone(&engine), source, config)
            .unwrap()
            .spawn()
            .unwrap();

        // Nine cycles finish by ~0.9s at a fixed rate, ~1.6s if each waited a full interval.
        assert!(handle.wait_for_cycles(9, Duration::from_millis(1_300)));
        handle.stop().unwrap();
    }

    #[test]
    fn stuck_read_is_not_queued_again() {
        let engine = Arc::new(MonitorEngine::default());
        let slow = SubjectId::new("slow").unwrap();
        engine.start_session(&slow).unwrap();
        let source = Arc::new(LagsFor {
            slow: vec![slow.clone()],
            delay: Duration::from_millis(400),
        });
        let config = SchedulerConfig {
            reader_workers: 1,
            source_timeout_ms: 20,
            ..SchedulerConfig::default()
        };
        let scheduler = SessionScheduler::with_config(Arc::clone(&engine), source, config).unwrap();

        assert_eq!(scheduler.run_cycle().unwrap().failed, 1);
        let second = scheduler.run_cycle().unwrap();
        assert_eq!(second.failed, 1);
        assert_eq!(scheduler.stuck.lock().unwrap().len(), 1);

        // Once the source answers, the session is queued afresh.
        thread::sleep(Duration::from_millis(500));
        let config = SchedulerConfig {
            source_timeout_ms: 1_000,
            ..scheduler.config.clone()
        };
        let scheduler = SessionScheduler {
            config,
            ..scheduler
        };
        assert_eq!(scheduler.run_cycle().unwrap().sampled, 1);
        assert!(scheduler.stuck.lock().unwrap().is_empty());
    }
}
