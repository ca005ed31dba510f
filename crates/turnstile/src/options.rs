// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
#[builder(default)]
pub struct SerializerOptions {
    /// # Reject reentrant calls
    ///
    /// When an operation, while holding its set's turn, calls a sibling through the queued path
    /// instead of the escape hatch, the call can never be admitted before the caller finishes.
    /// With this enabled such calls settle immediately with a reentrant-call error instead of
    /// being queued. Only calls made from the task running the turn are detected.
    pub reject_reentrant_calls: bool,

    /// # Slow turn threshold
    ///
    /// If set, a turn that runs for longer than this is reported at WARN level, and again with
    /// exponential backoff until it completes. Needs a runtime with the time driver enabled.
    #[serde_as(as = "Option<serde_with::DisplayFromStr>")]
    #[builder(setter(strip_option))]
    pub slow_turn_threshold: Option<humantime::Duration>,
}

impl SerializerOptions {
    pub fn slow_turn_threshold(&self) -> Option<Duration> {
        self.slow_turn_threshold.map(Into::into)
    }
}

impl Default for SerializerOptions {
    fn default() -> Self {
        Self {
            reject_reentrant_calls: true,
            slow_turn_threshold: None,
        }
    }
}
