// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use crate::operation::Operation;
use crate::set::{OperationSet, WrappedOperation};

/// Recovers original operations from wrapped ones, keeping the shape of the input.
pub trait Unwrap {
    type Output;

    fn unwrap_operations(&self) -> Self::Output;
}

/// Returns the original operation(s) behind `wrapped`: one operation for one wrapped
/// operation, a sequence for a sequence. Calling the result bypasses all serialization.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use turnstile::{Operation, unwrap, wrap};
///
/// let add = Operation::from_fn(|(a, b): (i32, i32)| a + b);
/// let wrapped = wrap([add.clone()]).unwrap();
///
/// let original = unwrap(&wrapped[0]);
/// assert!(Operation::ptr_eq(&original, &add));
/// assert_eq!(original.call((2, 3)).await, 5);
/// # }
/// ```
pub fn unwrap<U: Unwrap + ?Sized>(wrapped: &U) -> U::Output {
    wrapped.unwrap_operations()
}

impl<A, R> Unwrap for WrappedOperation<A, R> {
    type Output = Operation<A, R>;

    fn unwrap_operations(&self) -> Self::Output {
        self.original().clone()
    }
}

impl<A, R> Unwrap for [WrappedOperation<A, R>] {
    type Output = Vec<Operation<A, R>>;

    fn unwrap_operations(&self) -> Self::Output {
        self.iter().map(Unwrap::unwrap_operations).collect()
    }
}

impl<A, R> Unwrap for Vec<WrappedOperation<A, R>> {
    type Output = Vec<Operation<A, R>>;

    fn unwrap_operations(&self) -> Self::Output {
        self.as_slice().unwrap_operations()
    }
}

impl<A, R, const N: usize> Unwrap for [WrappedOperation<A, R>; N] {
    type Output = [Operation<A, R>; N];

    fn unwrap_operations(&self) -> Self::Output {
        self.each_ref().map(Unwrap::unwrap_operations)
    }
}

impl<A, R> Unwrap for OperationSet<A, R> {
    type Output = Vec<Operation<A, R>>;

    fn unwrap_operations(&self) -> Self::Output {
        self.operations().unwrap_operations()
    }
}
