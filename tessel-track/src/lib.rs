// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Combined _track_ capabilities for the tessel simulators.
//!
//! _Track_ means the combination of _log_ and _trace_ where:
//!
//!   - _log_ are text-based human-readable messages emitted at various levels
//!     of verbosity (from `Trace` through to `Error`).
//!   - _trace_ provides a small set of modelling events: entity creation and
//!     destruction, sampled values and simulation time updates.
//!
//! Every part of a model owns an [`Entity`](crate::entity::Entity) so that
//! events can be attributed and filtered by hierarchical name.

// Enable warnings for missing documentation
#![warn(missing_docs)]

use std::cell::RefCell;
use std::rc::Rc;

pub use log;

pub mod builder;
pub mod entity;
pub mod id;
pub mod test_helpers;

/// Include the trackers.
pub mod tracker;
pub use id::Id;
pub use tracker::{Track, Tracker};

/// A type alias for objects that receive _log_ / _trace_ events.
pub type Writer = Box<dyn std::io::Write>;
type SharedWriter = Rc<RefCell<Writer>>;

/// ID value which indicates where there is no valid ID.
pub const NO_ID: Id = Id(0);

/// The root ID from which all other IDs are derived.
pub const ROOT: Id = Id(1);

/// Emit a trace-level event when the entity is enabled for it.
///
/// The event body is only evaluated when it will be recorded.
#[doc(hidden)]
#[macro_export]
macro_rules! trace_event {
    ($entity:expr, $event:expr) => {{
        if $entity.enabled($crate::log::Level::Trace) {
            $event;
        }
    }};
}

/// Add an entity creation event.
#[macro_export]
macro_rules! create {
    ($entity:expr) => {
        $crate::trace_event!(
            $entity,
            $entity
                .tracker
                .create($entity.parent_id(), $entity.id, &$entity.full_name())
        )
    };
}

/// Add an entity destroy event.
#[macro_export]
macro_rules! destroy {
    ($entity:expr) => {
        $crate::trace_event!($entity, $entity.tracker.destroy($entity.parent_id(), $entity.id))
    };
}

/// Record a sampled value for an entity.
#[macro_export]
macro_rules! value {
    ($entity:expr ; $value:expr) => {
        $crate::trace_event!($entity, $entity.tracker.value($entity.id, $value as f64))
    };
}

/// Move the tracker on to simulation cycle `$cycle`.
#[macro_export]
macro_rules! set_time {
    ($entity:expr ; $cycle:expr) => {
        $crate::trace_event!($entity, $entity.tracker.time($entity.id, $cycle))
    };
}

/// Log at an explicit level. Formatting is skipped unless the entity is
/// enabled at that level.
#[macro_export]
macro_rules! log_at {
    ($entity:expr ; $lvl:expr, $($arg:tt)+) => {{
        let level = $lvl;
        if $entity.enabled(level) {
            $entity.tracker.log($entity.id, level, format_args!($($arg)+));
        }
    }};
}

/// Log at `Trace`, for per-request detail.
#[macro_export]
macro_rules! trace {
    ($entity:expr ; $($arg:tt)+) => {
        $crate::log_at!($entity ; $crate::log::Level::Trace, $($arg)+)
    };
}

/// Log at `Debug`, for per-batch or per-layer detail.
#[macro_export]
macro_rules! debug {
    ($entity:expr ; $($arg:tt)+) => {
        $crate::log_at!($entity ; $crate::log::Level::Debug, $($arg)+)
    };
}

/// Log at `Info`.
#[macro_export]
macro_rules! info {
    ($entity:expr ; $($arg:tt)+) => {
        $crate::log_at!($entity ; $crate::log::Level::Info, $($arg)+)
    };
}

/// Log at `Warn`.
#[macro_export]
macro_rules! warn {
    ($entity:expr ; $($arg:tt)+) => {
        $crate::log_at!($entity ; $crate::log::Level::Warn, $($arg)+)
    };
}

/// Log at `Error`.
#[macro_export]
macro_rules! error {
    ($entity:expr ; $($arg:tt)+) => {
        $crate::log_at!($entity ; $crate::log::Level::Error, $($arg)+)
    };
}
