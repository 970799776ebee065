// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Bounded, timestamped event logs. Logs are meant to be thread-local: see
//! [`make_event_log`] and the tests for sample usage.

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt::Display;

/// Something that happened, with the time it happened and its position in the log
pub(crate) struct Event<T: Display> {
    code: T,
    ord: usize,
    time: DateTime<Local>,
}

/// A log keeping the last `max` events. Older events are evicted as new ones get added.
pub(crate) struct EventLog<T: Display> {
    name: &'static str,
    items: VecDeque<Event<T>>,
    max: usize,
    ord: usize,
}

impl<T: Display> EventLog<T> {
    #[must_use]
    pub(crate) fn new(name: &'static str, max: usize) -> Self {
        Self {
            name,
            items: VecDeque::with_capacity(max),
            max: max.max(1),
            ord: 0,
        }
    }
    pub(crate) fn add(&mut self, code: T) {
        if self.items.len() == self.max {
            self.items.pop_front();
        }
        self.items.push_back(Event {
            code,
            ord: self.ord,
            time: Local::now(),
        });
        self.ord += 1;
    }
}

impl<T: Display> Display for Event<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let time = self.time.format("%Y-%m-%dT %H:%M:%S%.3f");
        write!(f, " {:<5} {time}: {}", self.ord, self.code)
    }
}

impl<T: Display> Display for EventLog<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, " {}", self.name)?;
        writeln!(
            f,
            " generated: {} stored: {} capacity: {}",
            self.ord,
            self.items.len(),
            self.max
        )?;
        for event in &self.items {
            writeln!(f, "{event}")?;
        }
        Ok(())
    }
}

/// Declare a thread-local [`EventLog`] for events of some type, with the given capacity
macro_rules! make_event_log {
    ($name:ident, $type:ty, $max:expr) => {
        thread_local! {
            pub(crate) static $name: std::cell::RefCell<$crate::event::EventLog<$type>> =
                std::cell::RefCell::new($crate::event::EventLog::new(stringify!($name), $max));
        }
    };
}
pub(crate) use make_event_log;

#[cfg(test)]
mod tests {
    use super::{Event, EventLog, make_event_log};
    use std::fmt::Display;

    macro_rules! log_event {
        ($name:ident, $item:expr) => {
            $name.with(|evlog| evlog.borrow_mut().add($item))
        };
    }

    impl<T: Display> Event<T> {
        fn code(&self) -> &T {
            &self.code
        }
    }

    impl<T: Display> EventLog<T> {
        fn generated(&self) -> usize {
            self.ord
        }
        fn len(&self) -> usize {
            self.items.len()
        }
        fn iter(&self) -> impl Iterator<Item = &Event<T>> {
            self.items.iter()
        }
    }

    #[test]
    fn test_event_log_order() {
        make_event_log!(TEST, String, 100);
        log_event!(TEST, "table created".to_string());
        log_event!(TEST, "route added".to_string());
        log_event!(TEST, "table released".to_string());

        TEST.with(|el| {
            let el = el.borrow();
            let codes: Vec<&String> = el.iter().map(|e| e.code()).collect();
            assert_eq!(codes, ["table created", "route added", "table released"]);
            assert_eq!(el.generated(), 3);
            println!("{el}");
        });
    }

    #[test]
    fn test_event_log_eviction() {
        make_event_log!(TEST, u32, 5);
        for n in 0..12 {
            log_event!(TEST, n);
        }
        TEST.with(|el| {
            let el = el.borrow();
            assert_eq!(el.len(), 5);
            assert_eq!(el.generated(), 12);
            let codes: Vec<u32> = el.iter().map(|e| *e.code()).collect();
            assert_eq!(codes, [7, 8, 9, 10, 11]);
        });
    }
}
