// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::fmt;

use crate::Id;
use crate::tracker::{EntityManager, Track, Tracker};

/// Fans events out to several [`Tracker`]s, for example stdout and a log
/// file.
///
/// IDs are allocated here so every contained tracker sees the same entity.
pub struct MultiTracker {
    entity_manager: EntityManager,
    trackers: Vec<Tracker>,
}

impl MultiTracker {
    /// Add a new tracker.
    pub fn add_tracker(&mut self, tracker: Tracker) {
        self.trackers.push(tracker);
    }

    /// The trackers that want events of `level` from entity `id`.
    fn enabled(&self, id: Id, level: log::Level) -> impl Iterator<Item = &Tracker> {
        self.trackers
            .iter()
            .filter(move |tracker| tracker.is_entity_enabled(id, level))
    }
}

impl Default for MultiTracker {
    fn default() -> Self {
        Self {
            entity_manager: EntityManager::new(log::Level::Error),
            trackers: Vec::new(),
        }
    }
}

impl Track for MultiTracker {
    fn unique_id(&self) -> Id {
        self.entity_manager.unique_id()
    }

    fn is_entity_enabled(&self, id: Id, level: log::Level) -> bool {
        self.enabled(id, level).next().is_some()
    }

    fn add_entity(&self, id: Id, entity_name: &str) {
        self.trackers
            .iter()
            .for_each(|tracker| tracker.add_entity(id, entity_name));
    }

    fn create(&self, created_by: Id, id: Id, name: &str) {
        self.enabled(id, log::Level::Trace)
            .for_each(|tracker| tracker.create(created_by, id, name));
    }

    fn destroy(&self, destroyed_by: Id, id: Id) {
        self.enabled(id, log::Level::Trace)
            .for_each(|tracker| tracker.destroy(destroyed_by, id));
    }

    fn value(&self, id: Id, value: f64) {
        self.enabled(id, log::Level::Trace)
            .for_each(|tracker| tracker.value(id, value));
    }

    fn log(&self, id: Id, level: log::Level, msg: fmt::Arguments) {
        self.enabled(id, level)
            .for_each(|tracker| tracker.log(id, level, msg));
    }

    fn time(&self, set_by: Id, cycle: u64) {
        self.enabled(set_by, log::Level::Trace)
            .for_each(|tracker| tracker.time(set_by, cycle));
    }

    fn shutdown(&self) {
        self.trackers.iter().for_each(|tracker| tracker.shutdown());
    }
}
