// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Define the [`Track`] trait and a number of [`Tracker`]s.

/// Include the multi-tracker.
pub mod multi_tracker;
/// Include the text-based tracker.
pub mod text;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub use multi_tracker::MultiTracker;
use regex::Regex;
pub use text::TextTracker;

use crate::{Id, ROOT};

/// Error used to return configuration errors.
#[derive(Debug)]
pub struct TrackConfigError(pub String);

impl fmt::Display for TrackConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Track configuration error: {}", self.0)
    }
}

impl std::error::Error for TrackConfigError {}

/// This is the interface that is supported by all [`Tracker`]s.
pub trait Track {
    /// Allocate a new global ID.
    fn unique_id(&self) -> Id;

    /// Determine whether tracking is enabled at `level` for the entity with
    /// the given ID.
    fn is_entity_enabled(&self, id: Id, level: log::Level) -> bool;

    /// Record an entity being created.
    fn add_entity(&self, id: Id, entity_name: &str);

    /// Track when an entity with the given ID is created.
    fn create(&self, created_by: Id, created_obj: Id, name: &str);

    /// Track when an entity with the given ID is destroyed.
    fn destroy(&self, destroyed_by: Id, destroyed_obj: Id);

    /// Track an entity sampling a value.
    fn value(&self, id: Id, value: f64);

    /// Track a log message of the given level.
    fn log(&self, msg_by: Id, level: log::Level, msg: fmt::Arguments);

    /// Advance the time to the simulation cycle specified.
    fn time(&self, set_by: Id, cycle: u64);

    /// Perform any pre-exit shutdown/cleanup.
    fn shutdown(&self);
}

/// The type of a [`Tracker`] that is shared across entities.
pub type Tracker = Rc<dyn Track>;

/// One line of text output. Every text-producing tracker renders events
/// through this so that logs and test expectations agree.
pub(crate) enum Event<'a> {
    Create { by: Id, id: Id, name: &'a str },
    Destroy { by: Id, id: Id },
    Value { id: Id, value: f64 },
    Log { id: Id, level: log::Level, msg: fmt::Arguments<'a> },
    Time { by: Id, cycle: u64 },
}

impl fmt::Display for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Create { by, id, name } => write!(f, "{by}: created {id}, {name}"),
            Event::Destroy { by, id } => write!(f, "{by}: destroyed {id}"),
            Event::Value { id, value } => write!(f, "{id}: value {value}"),
            Event::Log { id, level, msg } => write!(f, "{id}:{level}: {msg}"),
            Event::Time { by, cycle } => write!(f, "{by}: set time to cycle {cycle}"),
        }
    }
}

/// The [`EntityManager`] determines the level at which each entity is
/// enabled and allocates unique [`Id`] values.
pub struct EntityManager {
    /// Level of tracking events to output for entities with no filter match.
    default_entity_level: log::Level,

    /// Regular expressions mapping entity names to log levels. The first
    /// match wins.
    regex_to_entity_level: Vec<(Regex, log::Level)>,

    unique_id: Cell<u64>,

    /// Last simulation cycle seen.
    current_cycle: Cell<u64>,

    /// Entities whose level differs from the default.
    entity_level_lookup: RefCell<HashMap<Id, log::Level>>,
}

impl EntityManager {
    /// Constructor with default [`log::Level`].
    #[must_use]
    pub fn new(default_entity_level: log::Level) -> Self {
        Self {
            default_entity_level,
            regex_to_entity_level: Vec::new(),
            unique_id: Cell::new(ROOT.0 + 1),
            current_cycle: Cell::new(0),
            entity_level_lookup: RefCell::new(HashMap::new()),
        }
    }

    fn unique_id(&self) -> Id {
        let id = self.unique_id.get();
        self.unique_id.set(id + 1);
        Id(id)
    }

    fn is_enabled_at_level(&self, id: Id, level: log::Level) -> bool {
        match self.entity_level_lookup.borrow().get(&id) {
            None => level <= self.default_entity_level,
            Some(entity_level) => level <= *entity_level,
        }
    }

    fn add_entity(&self, id: Id, entity_name: &str) {
        let entity_level = self.level_for(entity_name);
        if entity_level != self.default_entity_level {
            self.entity_level_lookup
                .borrow_mut()
                .insert(id, entity_level);
        }
    }

    fn level_for(&self, entity_name: &str) -> log::Level {
        self.regex_to_entity_level
            .iter()
            .find(|(regex, _)| regex.is_match(entity_name))
            .map_or(self.default_entity_level, |(_, level)| *level)
    }

    /// Add a filter regular expression to set matching entities to a given
    /// level.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tessel_track::tracker::EntityManager;
    /// let mut manager = EntityManager::new(log::Level::Warn);
    /// manager.add_entity_level_filter(".*buffer.*", log::Level::Trace).unwrap();
    /// ```
    pub fn add_entity_level_filter(
        &mut self,
        regex_str: &str,
        level: log::Level,
    ) -> Result<(), TrackConfigError> {
        let regex = Regex::new(regex_str).map_err(|e| {
            TrackConfigError(format!("Failed to parse regex {regex_str}:\n{e}\n"))
        })?;
        self.regex_to_entity_level.push((regex, level));
        Ok(())
    }

    fn cycle(&self) -> u64 {
        self.current_cycle.get()
    }

    fn set_cycle(&self, cycle: u64) {
        assert!(
            cycle >= self.current_cycle.get(),
            "simulation time moved backwards"
        );
        self.current_cycle.set(cycle);
    }
}

#[cfg(test)]
mod tests {
    use log::Level;

    use super::*;

    fn entity_paths() -> Vec<&'static str> {
        vec!["top", "top::engine", "top::buffer", "top::buffer::act"]
    }

    #[test]
    fn no_filters() {
        let manager = EntityManager::new(Level::Error);

        for p in entity_paths() {
            assert_eq!(manager.level_for(p), Level::Error);
        }
    }

    #[test]
    fn filter_buffer_trace() {
        let mut manager = EntityManager::new(Level::Error);
        manager
            .add_entity_level_filter(r".*buffer.*", Level::Trace)
            .unwrap();

        let expected_levels = [Level::Error, Level::Error, Level::Trace, Level::Trace];

        for (i, p) in entity_paths().iter().enumerate() {
            assert_eq!(manager.level_for(p), expected_levels[i]);
        }
    }

    #[test]
    fn first_filter_wins() {
        let mut manager = EntityManager::new(Level::Warn);
        manager
            .add_entity_level_filter(r".*act$", Level::Debug)
            .unwrap();
        manager
            .add_entity_level_filter(r"top::.*", Level::Info)
            .unwrap();

        let expected_levels = [Level::Warn, Level::Info, Level::Info, Level::Debug];

        for (i, p) in entity_paths().iter().enumerate() {
            assert_eq!(manager.level_for(p), expected_levels[i]);
        }
    }

    #[test]
    fn bad_regex_is_reported() {
        let mut manager = EntityManager::new(Level::Warn);
        assert!(manager.add_entity_level_filter(r"(", Level::Debug).is_err());
    }

    #[test]
    fn enables_follow_registered_entities() {
        let mut manager = EntityManager::new(Level::Warn);
        manager
            .add_entity_level_filter(r".*engine", Level::Trace)
            .unwrap();

        let top = manager.unique_id();
        let engine = manager.unique_id();
        manager.add_entity(top, "top");
        manager.add_entity(engine, "top::engine");

        assert!(!manager.is_enabled_at_level(top, Level::Info));
        assert!(manager.is_enabled_at_level(top, Level::Warn));
        assert!(manager.is_enabled_at_level(engine, Level::Trace));
    }

    #[test]
    fn ids() {
        let manager = EntityManager::new(Level::Error);
        for i in 0..10 {
            assert_eq!(manager.unique_id(), Id(i + ROOT.0 + 1));
        }
    }
}
