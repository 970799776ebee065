// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The RIB work queue. Route-change events are accumulated in a [`MetaQueue`] and processed
//! in batches of bounded size. The first event arriving on an empty queue arms a hold timer
//! so that bursts get coalesced in a single batch. Events whose processing fails transiently
//! are put back in their class and the queue re-arms with the (shorter) retry time.

use crate::errors::RouterError;
use crate::rib::event::{MetaQueueClass, RibEvent};
use crate::rib::metaq::MetaQueue;
use std::time::{Duration, Instant};

#[allow(unused)]
use tracing::{debug, error, warn};

/// Something that applies route-change events
pub trait RibProcessor {
    /// Apply a single event
    ///
    /// # Errors
    /// Transient errors get the event retried. Any other error drops it.
    fn process(&mut self, event: &RibEvent) -> Result<(), RouterError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct WorkQueueStats {
    pub cycles: u64,
    pub processed: u64,
    pub retries: u64,
    /// events discarded because they can never be applied
    pub dropped: u64,
    /// events that kept failing transiently beyond the retry limit
    pub failed: u64,
}

/// Outcome of a single run of the work queue
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct WorkQueueRun {
    pub processed: usize,
    pub retried: usize,
    pub dropped: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct WorkQueue {
    metaq: MetaQueue,
    hold: Duration,
    retry: Duration,
    budget: usize,
    max_retries: u32,
    deadline: Option<Instant>,
    accepting: bool,
    stats: WorkQueueStats,
}

impl WorkQueue {
    #[must_use]
    pub fn new(hold: Duration, retry: Duration, budget: usize, max_retries: u32) -> Self {
        Self {
            metaq: MetaQueue::new(),
            hold,
            retry,
            budget: budget.max(1),
            max_retries,
            deadline: None,
            accepting: true,
            stats: WorkQueueStats::default(),
        }
    }

    /// Queue an event. If the queue was empty, processing is scheduled after the hold time.
    ///
    /// # Errors
    /// Fails if the queue no longer accepts events.
    pub fn enqueue(&mut self, event: RibEvent, now: Instant) -> Result<(), RouterError> {
        if !self.accepting {
            warn!("Rejecting event {event}: work queue is closed");
            return Err(RouterError::ShuttingDown);
        }
        if self.metaq.is_empty() && self.deadline.is_none() {
            self.deadline = Some(now + self.hold);
        }
        self.metaq.push(event);
        Ok(())
    }

    /// When the queue should be run next, if at all
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Tell if the queue is due at the given time
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }

    /// Process a batch of at most `budget` events if the queue is due
    pub fn run<P: RibProcessor>(&mut self, now: Instant, processor: &mut P) -> WorkQueueRun {
        let mut outcome = WorkQueueRun::default();
        if !self.is_due(now) {
            return outcome;
        }
        self.deadline.take();
        self.stats.cycles += 1;

        let batch = self.metaq.next_batch(self.budget);
        let mut retry = Vec::new();
        for mut event in batch {
            event.attempts += 1;
            match processor.process(&event) {
                Ok(()) => outcome.processed += 1,
                Err(e) if e.is_transient() => {
                    if event.attempts > self.max_retries {
                        error!(
                            "Giving up on event {event} after {} attempts: {e}",
                            event.attempts
                        );
                        outcome.failed += 1;
                    } else {
                        debug!("Will retry event {event}: {e}");
                        retry.push(event);
                    }
                }
                Err(e) => {
                    error!("Dropping event {event}: {e}");
                    outcome.dropped += 1;
                }
            }
        }
        outcome.retried = retry.len();
        self.metaq.requeue(retry);

        if outcome.retried > 0 {
            self.deadline = Some(now + self.retry);
        } else if !self.metaq.is_empty() {
            self.deadline = Some(now);
        }

        self.stats.processed += outcome.processed as u64;
        self.stats.retries += outcome.retried as u64;
        self.stats.dropped += outcome.dropped as u64;
        self.stats.failed += outcome.failed as u64;
        outcome
    }

    /// Stop accepting new events. Pending events are still processed.
    pub fn close(&mut self) {
        self.accepting = false;
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    /// Discard every pending event
    pub fn flush(&mut self) -> usize {
        self.deadline.take();
        self.metaq.clear()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.metaq.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metaq.is_empty()
    }

    #[must_use]
    pub fn len_class(&self, class: MetaQueueClass) -> usize {
        self.metaq.len_class(class)
    }

    #[must_use]
    pub fn budget(&self) -> usize {
        self.budget
    }

    #[must_use]
    pub fn hold_time(&self) -> Duration {
        self.hold
    }

    #[must_use]
    pub fn retry_time(&self) -> Duration {
        self.retry
    }

    #[must_use]
    pub fn stats(&self) -> &WorkQueueStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rib::table::tests::mk_prefix;
    use crate::rib::table::{Afi, Route, Safi, TableKey};
    use tracing_test::traced_test;

    const HOLD: Duration = Duration::from_millis(10);
    const RETRY: Duration = Duration::from_millis(1);

    fn mk_event(n: u32) -> RibEvent {
        let key = TableKey::new(0, Afi::Ipv4, Safi::Unicast, 254);
        RibEvent::add(key, mk_prefix(&format!("10.0.{n}.0/24")), Route::default())
    }

    /// A processor that records what it sees and fails as told
    #[derive(Default)]
    struct Recorder {
        seen: Vec<RibEvent>,
        busy: u32,
        malformed: bool,
    }
    impl RibProcessor for Recorder {
        fn process(&mut self, event: &RibEvent) -> Result<(), RouterError> {
            if self.malformed {
                return Err(RouterError::MalformedKey(event.key));
            }
            if self.busy > 0 {
                self.busy -= 1;
                return Err(RouterError::TableBusy(event.key));
            }
            self.seen.push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn test_hold_time_coalesces() {
        let mut wq = WorkQueue::new(HOLD, RETRY, 100, 3);
        let mut rec = Recorder::default();
        let t0 = Instant::now();
        assert!(wq.deadline().is_none());

        wq.enqueue(mk_event(1), t0).unwrap();
        wq.enqueue(mk_event(2), t0 + Duration::from_millis(5)).unwrap();
        /* the second event must not push the deadline */
        assert_eq!(wq.deadline(), Some(t0 + HOLD));

        let run = wq.run(t0 + Duration::from_millis(5), &mut rec);
        assert_eq!(run, WorkQueueRun::default());

        let run = wq.run(t0 + HOLD, &mut rec);
        assert_eq!(run.processed, 2);
        assert!(wq.deadline().is_none());
        assert_eq!(wq.stats().cycles, 1);
    }

    #[test]
    fn test_budget_reschedules_immediately() {
        let mut wq = WorkQueue::new(HOLD, RETRY, 4, 3);
        let mut rec = Recorder::default();
        let t0 = Instant::now();
        for n in 0..10 {
            wq.enqueue(mk_event(n), t0).unwrap();
        }
        let t1 = t0 + HOLD;
        assert_eq!(wq.run(t1, &mut rec).processed, 4);
        assert_eq!(wq.deadline(), Some(t1));
        assert_eq!(wq.run(t1, &mut rec).processed, 4);
        assert_eq!(wq.run(t1, &mut rec).processed, 2);
        assert!(wq.deadline().is_none());
        let order: Vec<_> = rec.seen.iter().map(|e| e.prefix).collect();
        let expected: Vec<_> = (0..10).map(|n| mk_event(n).prefix).collect();
        assert_eq!(order, expected);
    }

    #[traced_test]
    #[test]
    fn test_transient_failures_are_retried_in_order() {
        let mut wq = WorkQueue::new(HOLD, RETRY, 100, 3);
        let mut rec = Recorder {
            busy: 2,
            ..Default::default()
        };
        let t0 = Instant::now();
        for n in 0..3 {
            wq.enqueue(mk_event(n), t0).unwrap();
        }
        let t1 = t0 + HOLD;
        let run = wq.run(t1, &mut rec);
        assert_eq!(run.retried, 2);
        assert_eq!(run.processed, 1);
        assert_eq!(wq.deadline(), Some(t1 + RETRY));

        let run = wq.run(t1 + RETRY, &mut rec);
        assert_eq!(run.processed, 2);
        let order: Vec<_> = rec.seen.iter().map(|e| e.prefix).collect();
        assert_eq!(order, vec![mk_event(2).prefix, mk_event(0).prefix, mk_event(1).prefix]);
        assert_eq!(rec.seen[1].attempts, 2);
        assert_eq!(wq.stats().retries, 2);
        assert!(logs_contain("Will retry event"));
    }

    #[traced_test]
    #[test]
    fn test_retry_limit() {
        let mut wq = WorkQueue::new(HOLD, RETRY, 100, 2);
        let mut rec = Recorder {
            busy: u32::MAX,
            ..Default::default()
        };
        let mut now = Instant::now();
        wq.enqueue(mk_event(0), now).unwrap();
        now += HOLD;
        assert_eq!(wq.run(now, &mut rec).retried, 1);
        now += RETRY;
        assert_eq!(wq.run(now, &mut rec).retried, 1);
        now += RETRY;
        assert_eq!(wq.run(now, &mut rec).failed, 1);
        assert!(wq.is_empty());
        assert_eq!(wq.stats().failed, 1);
        assert!(logs_contain("Giving up on event"));
    }

    #[traced_test]
    #[test]
    fn test_malformed_events_are_dropped() {
        let mut wq = WorkQueue::new(HOLD, RETRY, 100, 3);
        let mut rec = Recorder {
            malformed: true,
            ..Default::default()
        };
        let t0 = Instant::now();
        wq.enqueue(mk_event(0), t0).unwrap();
        let run = wq.run(t0 + HOLD, &mut rec);
        assert_eq!(run.dropped, 1);
        assert!(wq.is_empty());
        assert!(wq.deadline().is_none());
        assert!(logs_contain("Dropping event"));
    }

    #[test]
    fn test_closed_queue_rejects() {
        let mut wq = WorkQueue::new(HOLD, RETRY, 100, 3);
        let mut rec = Recorder::default();
        let t0 = Instant::now();
        wq.enqueue(mk_event(0), t0).unwrap();
        wq.close();
        assert_eq!(wq.enqueue(mk_event(1), t0), Err(RouterError::ShuttingDown));
        /* in-flight work still completes */
        assert_eq!(wq.run(t0 + HOLD, &mut rec).processed, 1);
    }
}
