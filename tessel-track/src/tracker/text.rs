// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::cell::RefCell;
use std::fmt;
use std::io::Write;
use std::rc::Rc;

use crate::tracker::{EntityManager, Event, Track};
use crate::{Id, SharedWriter, Writer};

/// A simple text logger to output messages to a Writer.
pub struct TextTracker {
    entity_manager: EntityManager,

    /// Writer to which all _log_ events will be written.
    writer: SharedWriter,
}

impl TextTracker {
    /// Create a new [`TextTracker`] with an [`EntityManager`].
    #[must_use]
    pub fn new(entity_manager: EntityManager, writer: Writer) -> Self {
        Self {
            entity_manager,
            writer: Rc::new(RefCell::new(writer)),
        }
    }

    fn emit(&self, event: Event) {
        // A failing writer must not stop the simulation.
        if let Err(e) = writeln!(self.writer.borrow_mut(), "{event}") {
            eprintln!("tessel-track: failed to write event: {e}");
        }
    }
}

impl Track for TextTracker {
    fn unique_id(&self) -> Id {
        self.entity_manager.unique_id()
    }

    fn is_entity_enabled(&self, id: Id, level: log::Level) -> bool {
        self.entity_manager.is_enabled_at_level(id, level)
    }

    fn add_entity(&self, id: Id, entity_name: &str) {
        self.entity_manager.add_entity(id, entity_name);
    }

    fn create(&self, by: Id, id: Id, name: &str) {
        self.emit(Event::Create { by, id, name });
    }

    fn destroy(&self, by: Id, id: Id) {
        self.emit(Event::Destroy { by, id });
    }

    fn value(&self, id: Id, value: f64) {
        self.emit(Event::Value { id, value });
    }

    fn log(&self, id: Id, level: log::Level, msg: fmt::Arguments) {
        self.emit(Event::Log { id, level, msg });
    }

    fn time(&self, by: Id, cycle: u64) {
        // Only changes of cycle are worth a line.
        if cycle != self.entity_manager.cycle() {
            self.entity_manager.set_cycle(cycle);
            self.emit(Event::Time { by, cycle });
        }
    }

    fn shutdown(&self) {
        if let Err(e) = self.writer.borrow_mut().flush() {
            eprintln!("tessel-track: failed to flush: {e}");
        }
    }
}
