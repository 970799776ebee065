// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The meta-queue: one FIFO sub-queue per priority class.
//!
//! Batches drain the sub-queues strictly by priority, except for classes that were starved:
//! a class that had pending events but got no service in the previous batch is served first,
//! for up to a third of the budget. This bounds the wait of every class to two batches.

use crate::rib::event::{MetaQueueClass, RibEvent};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct MetaQueue {
    subq: [VecDeque<RibEvent>; MetaQueueClass::COUNT],
    starved: [bool; MetaQueueClass::COUNT],
}

#[allow(clippy::len_without_is_empty)]
impl MetaQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: RibEvent) {
        self.subq[event.class.index()].push_back(event);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subq.iter().map(VecDeque::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subq.iter().all(VecDeque::is_empty)
    }

    #[must_use]
    pub fn len_class(&self, class: MetaQueueClass) -> usize {
        self.subq[class.index()].len()
    }

    #[must_use]
    pub fn is_starved(&self, class: MetaQueueClass) -> bool {
        self.starved[class.index()]
    }

    fn take(&mut self, class: MetaQueueClass, max: usize, batch: &mut Vec<RibEvent>) -> usize {
        let q = &mut self.subq[class.index()];
        let n = max.min(q.len());
        batch.extend(q.drain(..n));
        n
    }

    /// Pop the next batch of at most `budget` events
    pub fn next_batch(&mut self, budget: usize) -> Vec<RibEvent> {
        let mut batch = Vec::with_capacity(budget.min(self.len()));
        let mut served = [false; MetaQueueClass::COUNT];
        let quantum = (budget / 3).max(1);

        for class in MetaQueueClass::ALL {
            if self.starved[class.index()] {
                let room = budget - batch.len();
                if self.take(class, quantum.min(room), &mut batch) > 0 {
                    served[class.index()] = true;
                }
            }
        }
        for class in MetaQueueClass::ALL {
            let room = budget - batch.len();
            if self.take(class, room, &mut batch) > 0 {
                served[class.index()] = true;
            }
        }
        for class in MetaQueueClass::ALL {
            let i = class.index();
            self.starved[i] = !served[i] && !self.subq[i].is_empty();
        }
        batch
    }

    /// Put events back at the head of their classes, keeping their relative order
    pub fn requeue(&mut self, events: Vec<RibEvent>) {
        for event in events.into_iter().rev() {
            self.subq[event.class.index()].push_front(event);
        }
    }

    /// Drop all pending events, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let count = self.len();
        self.subq.iter_mut().for_each(VecDeque::clear);
        self.starved = [false; MetaQueueClass::COUNT];
        count
    }
}
