// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Helper functions for testing tracking output.
//!
//! The [`TestTracker`] keeps every event in memory so that a test can check
//! what was emitted with [`check_and_clear`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::fs;
use std::io::BufWriter;
use std::path::Path;
use std::rc::Rc;

use regex::Regex;

use crate::tracker::{EntityManager, Event, TextTracker};
use crate::{Id, Track, Tracker, Writer};

/// A tracker that records every event in memory and enables everything.
pub struct TestTracker {
    events: RefCell<Vec<String>>,
    next_id: Cell<u64>,
}

impl TestTracker {
    /// Create a tracker whose first allocated [`Id`] is `initial_id`.
    #[must_use]
    pub fn new(initial_id: u64) -> Self {
        Self {
            events: RefCell::new(Vec::new()),
            next_id: Cell::new(initial_id),
        }
    }

    fn record(&self, event: Event) {
        let line = event.to_string();
        println!("{line}");
        self.events.borrow_mut().push(line);
    }
}

impl Track for TestTracker {
    fn unique_id(&self) -> Id {
        let id = self.next_id.replace(self.next_id.get() + 1);
        Id(id)
    }

    fn is_entity_enabled(&self, _id: Id, _level: log::Level) -> bool {
        true
    }

    fn add_entity(&self, _id: Id, _entity_name: &str) {}

    fn create(&self, by: Id, id: Id, name: &str) {
        self.record(Event::Create { by, id, name });
    }

    fn destroy(&self, by: Id, id: Id) {
        self.record(Event::Destroy { by, id });
    }

    fn value(&self, id: Id, value: f64) {
        self.record(Event::Value { id, value });
    }

    fn log(&self, id: Id, level: log::Level, msg: fmt::Arguments) {
        self.record(Event::Log { id, level, msg });
    }

    fn time(&self, by: Id, cycle: u64) {
        self.record(Event::Time { by, cycle });
    }

    fn shutdown(&self) {}
}

/// Initialise a [`TestTracker`] for a test.
///
/// Returns both the concrete tracker (for [`check_and_clear`]) and the same
/// object as a [`Tracker`](crate::Tracker).
///
/// # Arguments
///
/// * `start_id` - The ID value to be set as the starting value
///
/// # Examples
///
/// ```
/// use tessel_track::test_helpers;
///
/// let (test_tracker, tracker) = tessel_track::test_init!(10);
/// let top = tessel_track::entity::toplevel(&tracker, "top");
/// test_helpers::check_and_clear(&test_tracker, &["0: created 10, top"]);
/// ```
#[macro_export]
macro_rules! test_init {
    ($start_id:expr) => {{
        let test_tracker = std::rc::Rc::new($crate::test_helpers::TestTracker::new($start_id));
        let tracker: $crate::Tracker = test_tracker.clone();
        (test_tracker, tracker)
    }};
}

/// Assert that the events recorded since the last check match `expected`,
/// a list of regular expressions, one per event. The events are then
/// discarded.
pub fn check_and_clear(tracker: &TestTracker, expected: &[&str]) {
    let events = tracker.events.take();
    assert_eq!(
        events.len(),
        expected.len(),
        "expected {expected:?}, got {events:?}"
    );
    for (pattern, event) in expected.iter().zip(&events) {
        let re = Regex::new(pattern).unwrap();
        assert!(re.is_match(event), "{event:?} does not match {pattern:?}");
    }
}

/// Create a tracker that writes every event of a test to
/// `traces/<test file stem>.log`.
#[must_use]
pub fn create_tracker(full_filepath: &str) -> Tracker {
    let dir = Path::new("traces");
    fs::create_dir_all(dir).unwrap();

    let stem = Path::new(full_filepath).file_stem().unwrap();
    let file = fs::File::create(dir.join(stem).with_extension("log")).unwrap();
    let writer: Writer = Box::new(BufWriter::new(file));

    Rc::new(TextTracker::new(EntityManager::new(log::Level::Trace), writer))
}
