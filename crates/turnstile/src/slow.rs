// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project_lite::pin_project;
use tokio::time::{Instant, Sleep};
use tracing::warn;

const MAX_REPEAT_DURATION: Duration = const { Duration::from_secs(30) };
const MIN_THRESHOLD: Duration = const { Duration::from_millis(1) };

/// Warns about a turn that keeps its set busy for too long.
pub(crate) trait SlowTurnExt: Future + Sized {
    /// Emits a `WARN` event once the future has been running for `after`, then again with a
    /// doubling interval (at most every 30 seconds) until it completes. If anything was
    /// reported, completion is reported as well.
    fn warn_when_slow(self, after: Duration, label: String) -> WarnWhenSlow<Self> {
        let after = after.max(MIN_THRESHOLD);
        let started_at = Instant::now();
        WarnWhenSlow {
            future: self,
            delay: tokio::time::sleep_until(started_at + after),
            started_at,
            repeat_after: after,
            has_warned: false,
            label,
        }
    }
}

impl<F: Future> SlowTurnExt for F {}

pin_project! {
    pub(crate) struct WarnWhenSlow<F> {
        #[pin]
        future: F,
        #[pin]
        delay: Sleep,
        started_at: Instant,
        repeat_after: Duration,
        has_warned: bool,
        label: String,
    }
}

impl<F: Future> Future for WarnWhenSlow<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        if let Poll::Ready(output) = this.future.poll(cx) {
            if *this.has_warned {
                warn!(
                    "{} completed after {:?}",
                    this.label,
                    this.started_at.elapsed()
                );
            }
            return Poll::Ready(output);
        }

        // Resetting to a future deadline and polling again registers the waker.
        while this.delay.as_mut().poll(cx).is_ready() {
            let now = Instant::now();
            *this.has_warned = true;
            warn!(
                "{} is still holding its turn after {:?}",
                this.label,
                now.saturating_duration_since(*this.started_at)
            );
            *this.repeat_after = next_interval(*this.repeat_after);
            this.delay.as_mut().reset(now + *this.repeat_after);
        }

        Poll::Pending
    }
}

/// Doubles the interval, never beyond 30 seconds unless it already started above that.
fn next_interval(current: Duration) -> Duration {
    current
        .saturating_mul(2)
        .clamp(current, MAX_REPEAT_DURATION.max(current))
}
