// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Router-wide sequence numbers. Sequence numbers only tell which of two changes happened
//! later; they wrap silently and must never be used as identifiers.

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct SeqCounter(AtomicU32);

impl SeqCounter {
    #[must_use]
    pub fn new(start: u32) -> Self {
        Self(AtomicU32::new(start))
    }

    /// Advance the counter and return the new value
    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// The last value handed out
    #[must_use]
    pub fn current(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Tell if sequence number `a` was issued before `b`, using serial-number arithmetic.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn seq_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}
