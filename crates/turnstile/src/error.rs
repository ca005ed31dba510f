// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use crate::turn::SetId;

/// Errors raised while building an [`OperationSet`](crate::OperationSet) or when a
/// wrapped operation is handed to a set it does not belong to.
#[derive(Debug, thiserror::Error)]
pub enum ExclusionError {
    #[error("an operation set needs at least one operation")]
    EmptyOperationSet,
    #[error("no tokio runtime available to drive operation set '{name}'")]
    NoRuntime {
        name: String,
        #[source]
        source: tokio::runtime::TryCurrentError,
    },
    #[error("wrapped operation belongs to {found}, not to {expected}")]
    ForeignOperation { expected: SetId, found: SetId },
}

/// Failures of a single invocation that are not produced by the operation itself.
///
/// Whatever the operation returns (including its own `Err` values) is delivered untouched as
/// the `Ok` side of the pending result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    #[error("operation panicked: {0}")]
    Panicked(String),
    #[error("{0} shut down before the invocation settled")]
    Closed(SetId),
    #[error("reentrant invocation on {0} while holding its turn; call through its turn instead")]
    ReentrantCall(SetId),
    #[error("turn does not belong to {expected}")]
    ForeignTurn { expected: SetId },
    #[error("turn on {0} has already ended")]
    TurnExpired(SetId),
    #[error("turn of a direct invocation cannot reach other operations")]
    DetachedTurn,
    #[error("{set} has no operation at index {index}")]
    UnknownOperation { set: SetId, index: usize },
}
