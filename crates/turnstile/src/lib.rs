// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Serializes calls across a group of operations.
//!
//! [`wrap`] (or [`OperationSet`]) takes a set of [`Operation`]s sharing one resource, such as a
//! connection or a device, and returns [`WrappedOperation`]s that execute at most one at a time.
//! Invocations queue in arrival order regardless of which operation they target.
//!
//! # Flow
//!
//! 1. [`WrappedOperation::call`] admits the invocation at the tail of the set's pending queue
//!    and immediately returns a [`PendingResult`].
//! 2. When every earlier invocation has settled, the set's driver task leaves the queue with it
//!    and runs the operation.
//! 3. The operation's return value settles the handle. A failing or panicking operation only
//!    affects its own handle; the next invocation runs normally.
//!
//! # Calling siblings from inside a turn
//!
//! An operation that awaits a queued call to its own set would wait on itself. Operations built
//! with [`Operation::with_turn`] receive a [`Turn`] instead: [`Turn::call`] runs a sibling of
//! the same set inline, addressed by its index, and [`WrappedOperation::call_in_turn`] does the
//! same through a wrapped handle. A turn cannot be created outside this crate, only works on the
//! set that issued it, and expires when the operation that received it settles.
//!
//! Prefer [`Turn::call`] over capturing wrapped handles of the same set inside an operation: a
//! captured handle keeps the set, and everything its operations own, alive for as long as the
//! operation itself exists.
//!
//! With [`SerializerOptions::reject_reentrant_calls`] enabled (the default), a queued call made
//! from inside a turn of the same set settles at once with [`InvocationError::ReentrantCall`].
//!
//! # Example
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI64, Ordering};
//!
//! use turnstile::{Operation, wrap};
//!
//! let counter = Arc::new(AtomicI64::new(0));
//! let add = {
//!     let counter = Arc::clone(&counter);
//!     Operation::new(move |n: i64| {
//!         let counter = Arc::clone(&counter);
//!         async move { counter.fetch_add(n, Ordering::SeqCst) + n }
//!     })
//! };
//! let reset = {
//!     let counter = Arc::clone(&counter);
//!     Operation::from_fn(move |_: i64| counter.swap(0, Ordering::SeqCst))
//! };
//!
//! let [add, reset] = <[_; 2]>::try_from(wrap([add, reset]).unwrap()).unwrap();
//! let first = add.call(2);
//! let second = add.call(3);
//! let cleared = reset.call(0);
//!
//! assert_eq!(first.await, Ok(2));
//! assert_eq!(second.await, Ok(5));
//! assert_eq!(cleared.await, Ok(5));
//! # }
//! ```

mod command;
mod error;
mod handle;
mod operation;
mod options;
mod set;
mod slow;
mod turn;
mod unwrap;

pub use error::{ExclusionError, InvocationError};
pub use handle::PendingResult;
pub use operation::Operation;
pub use options::{SerializerOptions, SerializerOptionsBuilder, SerializerOptionsBuilderError};
pub use set::{OperationSet, OperationSetBuilder, WrappedOperation, wrap};
pub use turn::{SetId, Turn};
pub use unwrap::{Unwrap, unwrap};
