// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Named nodes of the model hierarchy.
//!
//! The engine, the buffer and the driver each hang an entity below the
//! run's top-level so that log lines can be filtered on paths such as
//! `top::buffer`.

use std::fmt;
use std::rc::Rc;

use crate::{Id, NO_ID, Tracker, create, destroy};

/// Separator between the levels of a hierarchical name.
pub const SEPARATOR: &str = "::";

/// A named node in the model hierarchy.
///
/// Only the top-level, created with [`toplevel`], has no parent.
pub struct Entity {
    /// Local name of this entity.
    pub name: String,

    /// The entity this one was created below.
    pub parent: Option<Rc<Entity>>,

    /// Identifier that log and trace events are attributed to.
    pub id: Id,

    /// Where log and trace events are sent.
    pub tracker: Tracker,

    path: String,
}

impl Entity {
    fn register(tracker: &Tracker, parent: Option<Rc<Entity>>, name: &str, path: String) -> Self {
        let id = tracker.unique_id();
        tracker.add_entity(id, &path);
        let entity = Self {
            name: name.to_string(),
            parent,
            id,
            tracker: tracker.clone(),
            path,
        };
        create!(entity);
        entity
    }

    /// Create a new entity below `parent`, sharing its tracker.
    #[must_use]
    pub fn new(parent: &Rc<Entity>, name: &str) -> Self {
        let path = format!("{}{SEPARATOR}{name}", parent.path);
        Self::register(&parent.tracker, Some(parent.clone()), name, path)
    }

    /// True when events at `level` from this entity are wanted.
    #[must_use]
    pub fn enabled(&self, level: log::Level) -> bool {
        self.tracker.is_entity_enabled(self.id, level)
    }

    /// The id of the parent, or [`NO_ID`] for the top-level.
    #[must_use]
    pub fn parent_id(&self) -> Id {
        self.parent.as_ref().map_or(NO_ID, |parent| parent.id)
    }

    /// The hierarchical name, for example `top::engine`.
    #[must_use]
    pub fn full_name(&self) -> String {
        self.path.clone()
    }
}

impl Drop for Entity {
    fn drop(&mut self) {
        destroy!(self);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}, {:?})", self.path, self.id)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Create the root of a hierarchy.
#[must_use]
pub fn toplevel(tracker: &Tracker, name: &str) -> Rc<Entity> {
    Rc::new(Entity::register(tracker, None, name, name.to_string()))
}
