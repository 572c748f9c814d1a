//! Readiness barrier.
//!
//! Counts READY notifications until every launched controller has reported,
//! then releases the control loop exactly once per cycle. Notifications come
//! from the event pump while the control loop waits, so the counter sits
//! behind a short-lived lock and a `Notify` wakes the waiter. The waiter is
//! timer-backed and never busy-polls.
//!
//! Only distinct senders count: a controller that reports twice in one cycle
//! is counted once, and once the launched pids are admitted a READY from any
//! other process is ignored.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lockproto::{ControllerEvent, ExitReport, ReadyStamp};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace};

use crate::error::BarrierError;

/// What happened to one READY notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// Counted; carries the new count.
    Counted(usize),
    /// Same sender already counted this cycle.
    Duplicate,
    /// Sender is not part of the admitted group.
    Foreign,
}

#[derive(Debug, Default)]
struct Counter {
    expected: usize,
    count: usize,
    /// Pids of the current launch; `None` until admitted.
    members: Option<HashSet<u32>>,
    seen: HashSet<u32>,
    stamps: Vec<ReadyStamp>,
}

impl Counter {
    fn clear(&mut self) {
        self.count = 0;
        self.seen.clear();
        self.stamps.clear();
    }

    fn is_member(&self, pid: u32) -> bool {
        self.members.as_ref().map_or(true, |m| m.contains(&pid))
    }

    /// Release and reset in one step so a READY arriving right after release
    /// lands in the next cycle.
    fn try_release(&mut self) -> Option<Vec<ReadyStamp>> {
        if self.count < self.expected {
            return None;
        }
        let stamps = std::mem::take(&mut self.stamps);
        self.clear();
        Some(stamps)
    }
}

#[derive(Debug, Default)]
pub struct ReadinessBarrier {
    counter: Mutex<Counter>,
    notify: Notify,
}

impl ReadinessBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Counter> {
        self.counter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset the count and set how many controllers must report.
    ///
    /// Must run before any controller is spawned. Until [`admit`] names the
    /// launched pids, READYs from any sender are held.
    ///
    /// [`admit`]: ReadinessBarrier::admit
    pub fn arm(&self, expected: usize) {
        let mut counter = self.lock();
        counter.clear();
        counter.members = None;
        counter.expected = expected;
        debug!(expected, "barrier armed");
    }

    /// Restrict counting to `pids`, dropping anything held from other
    /// senders (late READYs of an earlier launch).
    pub fn admit(&self, pids: &[u32]) {
        let mut counter = self.lock();
        let members: HashSet<u32> = pids.iter().copied().collect();
        let before = counter.stamps.len();
        counter.stamps.retain(|s| members.contains(&s.pid));
        let dropped = before - counter.stamps.len();
        if dropped > 0 {
            debug!(dropped, "dropped READYs from outside the launch");
        }
        counter.seen = counter.stamps.iter().map(|s| s.pid).collect();
        counter.count = counter.stamps.len();
        counter.members = Some(members);
    }

    /// Record one READY. Safe to call from any task.
    pub fn signal_ready(&self, stamp: ReadyStamp) -> ReadyOutcome {
        let stamp_pid = stamp.pid;
        let outcome = {
            let mut counter = self.lock();
            if !counter.is_member(stamp.pid) {
                ReadyOutcome::Foreign
            } else if !counter.seen.insert(stamp.pid) {
                ReadyOutcome::Duplicate
            } else {
                counter.count += 1;
                counter.stamps.push(stamp);
                ReadyOutcome::Counted(counter.count)
            }
        };

        match outcome {
            ReadyOutcome::Counted(count) => {
                trace!(count, "ready counted");
                self.notify.notify_waiters();
            }
            other => debug!(pid = stamp_pid, ?other, "ready ignored"),
        }
        outcome
    }

    pub fn count(&self) -> usize {
        self.lock().count
    }

    pub fn expected(&self) -> usize {
        self.lock().expected
    }

    /// Zero the count, keeping the expected total and admitted pids.
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Wait until every expected controller is ready, or `timeout` elapses.
    ///
    /// On success the count is already reset for the next cycle and the
    /// READY stamps of this cycle are returned. On timeout the count is left
    /// untouched so the caller can report it.
    pub async fn await_ready(
        &self,
        timeout: Duration,
        progress_every: Duration,
    ) -> Result<Vec<ReadyStamp>, BarrierError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut next_progress = started + progress_every;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a READY between the check
            // and the await still wakes us.
            notified.as_mut().enable();

            if let Some(stamps) = self.lock().try_release() {
                return Ok(stamps);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until(next_progress) => {
                    let (count, expected) = {
                        let counter = self.lock();
                        (counter.count, counter.expected)
                    };
                    info!(
                        ready = count,
                        expected,
                        waited_secs = started.elapsed().as_secs_f64(),
                        "waiting for controllers"
                    );
                    next_progress += progress_every;
                }
                _ = sleep_until(deadline) => {
                    let mut counter = self.lock();
                    if let Some(stamps) = counter.try_release() {
                        return Ok(stamps);
                    }
                    return Err(BarrierError::Timeout {
                        observed: counter.count,
                        expected: counter.expected,
                        waited: timeout,
                    });
                }
            }
        }
    }
}

/// Route controller events: READYs into the barrier, exits to the loop.
///
/// Runs until every event sender is gone.
pub fn spawn_event_pump(
    mut events: mpsc::UnboundedReceiver<ControllerEvent>,
    barrier: Arc<ReadinessBarrier>,
    exits: mpsc::UnboundedSender<ExitReport>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ControllerEvent::Ready(stamp) => {
                    barrier.signal_ready(stamp);
                }
                ControllerEvent::Exited(report) => {
                    if exits.send(report).is_err() {
                        break;
                    }
                }
            }
        }
        debug!("event pump stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(30);
    const PROGRESS: Duration = Duration::from_secs(2);

    #[tokio::test(start_paused = true)]
    async fn releases_when_all_report() {
        let barrier = Arc::new(ReadinessBarrier::new());
        barrier.arm(3);

        for (i, pid) in [101u32, 102, 103].into_iter().enumerate() {
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100 * (i as u64 + 1))).await;
                barrier.signal_ready(ReadyStamp::now(pid));
            });
        }

        let stamps = barrier.await_ready(TIMEOUT, PROGRESS).await.unwrap();
        assert_eq!(stamps.len(), 3);
        // Reset on release
        assert_eq!(barrier.count(), 0);
        assert_eq!(barrier.expected(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn already_full_releases_immediately() {
        let barrier = ReadinessBarrier::new();
        barrier.arm(2);
        barrier.signal_ready(ReadyStamp::now(1));
        barrier.signal_ready(ReadyStamp::now(2));

        let started = Instant::now();
        barrier.await_ready(TIMEOUT, PROGRESS).await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_leaves_count_for_inspection() {
        let barrier = ReadinessBarrier::new();
        barrier.arm(2);
        barrier.signal_ready(ReadyStamp::now(1));

        let err = barrier.await_ready(TIMEOUT, PROGRESS).await.unwrap_err();
        assert_eq!(
            err,
            BarrierError::Timeout {
                observed: 1,
                expected: 2,
                waited: TIMEOUT,
            }
        );
        assert_eq!(barrier.count(), 1);

        barrier.reset();
        assert_eq!(barrier.count(), 0);
    }

    #[test]
    fn duplicate_sender_counts_once() {
        let barrier = ReadinessBarrier::new();
        barrier.arm(2);
        assert_eq!(
            barrier.signal_ready(ReadyStamp::now(7)),
            ReadyOutcome::Counted(1)
        );
        assert_eq!(
            barrier.signal_ready(ReadyStamp::now(7)),
            ReadyOutcome::Duplicate
        );
        assert_eq!(barrier.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn one_controller_repeating_never_releases_two() {
        let barrier = ReadinessBarrier::new();
        barrier.arm(2);
        for _ in 0..5 {
            barrier.signal_ready(ReadyStamp::now(3));
        }
        assert_eq!(barrier.count(), 1);
        assert!(barrier.await_ready(TIMEOUT, PROGRESS).await.is_err());
    }

    #[test]
    fn admitted_group_ignores_other_senders() {
        let barrier = ReadinessBarrier::new();
        barrier.arm(2);
        // Late READY from a previous launch, before the new pids are known
        barrier.signal_ready(ReadyStamp::now(90));
        barrier.signal_ready(ReadyStamp::now(11));
        assert_eq!(barrier.count(), 2);

        barrier.admit(&[11, 12]);
        assert_eq!(barrier.count(), 1);
        assert_eq!(
            barrier.signal_ready(ReadyStamp::now(90)),
            ReadyOutcome::Foreign
        );
        assert_eq!(
            barrier.signal_ready(ReadyStamp::now(11)),
            ReadyOutcome::Duplicate
        );
        assert_eq!(
            barrier.signal_ready(ReadyStamp::now(12)),
            ReadyOutcome::Counted(2)
        );
    }

    #[test]
    fn rearming_forgets_the_previous_group() {
        let barrier = ReadinessBarrier::new();
        barrier.arm(1);
        barrier.admit(&[11]);
        barrier.arm(1);
        assert_eq!(
            barrier.signal_ready(ReadyStamp::now(21)),
            ReadyOutcome::Counted(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_cycles_are_independent() {
        let barrier = ReadinessBarrier::new();
        barrier.arm(2);

        for _cycle in 0..3 {
            barrier.signal_ready(ReadyStamp::now(1));
            barrier.signal_ready(ReadyStamp::now(2));
            let stamps = barrier.await_ready(TIMEOUT, PROGRESS).await.unwrap();
            assert_eq!(stamps.len(), 2);
            assert_eq!(barrier.count(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pump_routes_events() {
        let barrier = Arc::new(ReadinessBarrier::new());
        barrier.arm(1);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (exits_tx, mut exits_rx) = mpsc::unbounded_channel();
        let pump = spawn_event_pump(events_rx, Arc::clone(&barrier), exits_tx);

        events_tx
            .send(ControllerEvent::Ready(ReadyStamp::now(5)))
            .unwrap();
        events_tx
            .send(ControllerEvent::Exited(ExitReport::new(5, Some(1), None)))
            .unwrap();

        let report = exits_rx.recv().await.unwrap();
        assert_eq!(report.pid, 5);
        assert_eq!(barrier.await_ready(TIMEOUT, PROGRESS).await.unwrap().len(), 1);

        drop(events_tx);
        pump.await.unwrap();
    }
}
