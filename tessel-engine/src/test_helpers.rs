// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use tessel_track::test_helpers::create_tracker;

use crate::context::SimContext;

#[must_use]
pub fn start_test(full_filepath: &str) -> SimContext {
    SimContext::new(&create_tracker(full_filepath))
}
