// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Unique identifiers attached to every tracked entity.

use std::fmt;

/// Each _log_/_trace_ event is attributed to the entity with this ID.
///
/// There are two reserved values: [`NO_ID`](crate::NO_ID) and
/// [`ROOT`](crate::ROOT).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(pub u64);

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.0)
    }
}
