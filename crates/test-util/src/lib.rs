// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Test utilities for the turnstile crates. Import them with:
//!
//! ```rust
//! use turnstile_test_util::{assert, assert_eq, assert_ne, let_assert, test};
//! ```
//!
//! Note: You cannot import them with a glob import, as the compiler won't be able to distinguish our imports and the stdlib imports.

use std::sync::Arc;

use parking_lot::Mutex;

/// Polls `$cond` until it holds, yielding to the runtime in between. Panics if it does not
/// hold within the timeout (5 seconds by default).
///
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use turnstile_test_util::eventually;
///
/// let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
/// let task_flag = flag.clone();
/// tokio::spawn(async move { task_flag.store(true, std::sync::atomic::Ordering::SeqCst) });
///
/// eventually!(flag.load(std::sync::atomic::Ordering::SeqCst));
/// # }
/// ```
#[macro_export]
macro_rules! eventually {
    ($cond:expr) => {
        $crate::eventually!($cond, ::std::time::Duration::from_secs(5))
    };
    ($cond:expr, $timeout:expr) => {
        if $crate::tokio::time::timeout($timeout, async {
            while !$cond {
                $crate::tokio::task::yield_now().await;
            }
        })
        .await
        .is_err()
        {
            ::std::panic!(
                "condition `{}` did not hold within {:?}",
                stringify!($cond),
                $timeout
            );
        }
    };
}

/// Asserts that a future does not complete within 100ms. The future is polled by mutable
/// reference, so it can still be awaited afterwards.
///
/// Note: this check is based on a timeout, hence based on the context it might not be enough to use
/// this assert to prove that the future can never complete.
#[macro_export]
macro_rules! assert_pending {
    ($fut:expr) => {
        ::std::assert!(
            $crate::tokio::time::timeout(::std::time::Duration::from_millis(100), &mut $fut)
                .await
                .is_err(),
            "`{}` completed but was expected to be pending",
            stringify!($fut)
        );
    };
}

/// Append-only record shared between a test and the operations it drives.
#[derive(Debug)]
pub struct Journal<T> {
    entries: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Journal<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Default for Journal<T> {
    fn default() -> Self {
        Self {
            entries: Arc::default(),
        }
    }
}

impl<T: Clone> Journal<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: T) {
        self.entries.lock().push(entry);
    }

    /// Copy of everything recorded so far, in recording order.
    pub fn entries(&self) -> Vec<T> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

// A couple of useful re-exports
pub use assert2::{assert, check, let_assert};
pub use pretty_assertions::{assert_eq, assert_ne};
pub use test_log::test;

#[doc(hidden)]
pub use tokio;
