// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::turn::Turn;

type OperationFn<A, R> = dyn Fn(Turn<A, R>, A) -> BoxFuture<'static, R> + Send + Sync;

/// A unit of work that can be registered in an [`OperationSet`](crate::OperationSet).
///
/// Cloning an `Operation` is cheap and keeps its identity: [`Operation::ptr_eq`] holds for all
/// clones, and for the original recovered through [`unwrap`](crate::unwrap).
pub struct Operation<A, R> {
    inner: Arc<OperationFn<A, R>>,
}

impl<A, R> Operation<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// An asynchronous operation that does not need its turn.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |_turn: Turn<A, R>, args: A| -> BoxFuture<'static, R> {
                f(args).boxed()
            }),
        }
    }

    /// An asynchronous operation receiving the [`Turn`] it runs in. Use [`Turn::call`] to call
    /// sibling operations of the same set.
    pub fn with_turn<F, Fut>(f: F) -> Self
    where
        F: Fn(Turn<A, R>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |turn: Turn<A, R>, args: A| -> BoxFuture<'static, R> {
                f(turn, args).boxed()
            }),
        }
    }

    /// A synchronous operation. It runs on the set's driver task, so it should not block for
    /// long.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self {
            inner: Arc::new(move |_turn: Turn<A, R>, args: A| -> BoxFuture<'static, R> {
                let f = Arc::clone(&f);
                async move { f(args) }.boxed()
            }),
        }
    }

    /// Invokes the operation directly, bypassing any serialization.
    ///
    /// Operations built with [`Operation::with_turn`] receive a detached turn which cannot be
    /// used for escape-hatch calls.
    pub async fn call(&self, args: A) -> R {
        self.invoke(Turn::detached(), args).await
    }

    /// The closure itself only runs once the returned future is polled, so a panic while
    /// building the future is raised inside the turn.
    pub(crate) fn invoke(&self, turn: Turn<A, R>, args: A) -> BoxFuture<'static, R> {
        let inner = Arc::clone(&self.inner);
        async move { inner(turn, args).await }.boxed()
    }
}

impl<A, R> Operation<A, R> {
    /// Whether both handles point to the same underlying operation.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.inner, &other.inner)
    }
}

impl<A, R> Clone for Operation<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, R> fmt::Debug for Operation<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Operation")
            .field(&Arc::as_ptr(&self.inner).cast::<()>())
            .finish()
    }
}
