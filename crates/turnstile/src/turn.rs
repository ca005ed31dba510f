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
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::trace;

use crate::error::InvocationError;
use crate::operation::Operation;

static NEXT_SET_ID: AtomicU64 = const { AtomicU64::new(1) };

/// Identifies one serialization domain. Unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SetId(NonZeroU64);

impl SetId {
    pub(crate) fn next() -> Self {
        let id = NEXT_SET_ID.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::new(id).expect("set id counter overflowed"))
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation-set#{}", self.0)
    }
}

/// Capability held by an operation while it executes in its turn.
///
/// A `Turn` can only be created by the operation set driving the operation. With
/// [`Turn::call`] the running operation invokes a sibling of the same set inline, without
/// queueing behind itself. [`WrappedOperation::call_in_turn`](crate::WrappedOperation::call_in_turn)
/// does the same through a wrapped handle.
///
/// A turn only refers weakly to the operations of its set, so storing it inside an operation
/// does not keep the set alive. It expires as soon as the operation that received it settles;
/// using it afterwards fails with [`InvocationError::TurnExpired`].
pub struct Turn<A, R> {
    grant: Option<Grant<A, R>>,
    active: Arc<AtomicBool>,
}

struct Grant<A, R> {
    set: SetId,
    operations: Weak<[Operation<A, R>]>,
}

impl<A, R> Turn<A, R> {
    pub(crate) fn begin(set: SetId, operations: Weak<[Operation<A, R>]>) -> Self {
        Self {
            grant: Some(Grant { set, operations }),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Turn handed to operations invoked directly, outside of any set.
    pub(crate) fn detached() -> Self {
        Self {
            grant: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A turn for a nested escape-hatch call. Expires together with `self`.
    pub(crate) fn reenter(&self) -> Self {
        Self {
            grant: self.grant.as_ref().map(|grant| Grant {
                set: grant.set,
                operations: Weak::clone(&grant.operations),
            }),
            active: Arc::clone(&self.active),
        }
    }

    /// Expires this turn, and every turn re-entered from it, when the returned guard drops.
    pub(crate) fn expiry(&self) -> Expiry {
        Expiry(Arc::clone(&self.active))
    }

    /// The set this turn was granted by, `None` for a direct invocation.
    pub fn set_id(&self) -> Option<SetId> {
        self.grant.as_ref().map(|grant| grant.set)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_detached(&self) -> bool {
        self.grant.is_none()
    }

    fn sibling(&self, index: usize) -> Result<Operation<A, R>, InvocationError> {
        let Some(grant) = &self.grant else {
            return Err(InvocationError::DetachedTurn);
        };
        if !self.is_active() {
            return Err(InvocationError::TurnExpired(grant.set));
        }
        let operations = grant
            .operations
            .upgrade()
            .ok_or(InvocationError::TurnExpired(grant.set))?;
        operations
            .get(index)
            .cloned()
            .ok_or(InvocationError::UnknownOperation {
                set: grant.set,
                index,
            })
    }
}

impl<A, R> Turn<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Runs the operation at `index` of this turn's set inline, bypassing the queue.
    ///
    /// The call executes exactly where it is awaited and shares this turn: the sibling receives
    /// a turn that expires together with this one.
    pub async fn call(&self, index: usize, args: A) -> Result<R, InvocationError> {
        let sibling = self.sibling(index)?;
        trace!(set = ?self.set_id(), op = index, "Running escape-hatch call");
        Ok(sibling.invoke(self.reenter(), args).await)
    }
}

/// Ends a turn on drop, including when the driver is torn down in the middle of it.
pub(crate) struct Expiry(Arc<AtomicBool>);

impl Drop for Expiry {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<A, R> fmt::Debug for Turn<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Turn")
            .field("set", &self.set_id())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<[Operation<u32, u32>]> {
        vec![
            Operation::from_fn(|x: u32| x + 1),
            Operation::from_fn(|x: u32| x * 2),
        ]
        .into()
    }

    #[test]
    fn set_ids_are_unique() {
        let a = SetId::next();
        let b = SetId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn reentered_turn_expires_with_parent() {
        let operations = registry();
        let turn = Turn::begin(SetId::next(), Arc::downgrade(&operations));
        let nested = turn.reenter();
        assert!(nested.is_active());
        assert_eq!(nested.set_id(), turn.set_id());

        drop(turn.expiry());
        assert!(!nested.is_active());
    }

    #[test]
    fn detached_turn_is_never_active() {
        let turn = Turn::<u32, u32>::detached();
        assert!(turn.is_detached());
        assert!(!turn.is_active());
    }

    #[tokio::test]
    async fn call_reaches_siblings_by_index() {
        let operations = registry();
        let set = SetId::next();
        let turn = Turn::begin(set, Arc::downgrade(&operations));

        assert_eq!(turn.call(0, 1).await, Ok(2));
        assert_eq!(turn.call(1, 21).await, Ok(42));
        assert_eq!(
            turn.call(2, 0).await,
            Err(InvocationError::UnknownOperation { set, index: 2 })
        );
    }

    #[tokio::test]
    async fn call_is_refused_once_unusable() {
        assert_eq!(
            Turn::<u32, u32>::detached().call(0, 1).await,
            Err(InvocationError::DetachedTurn)
        );

        let operations = registry();
        let set = SetId::next();
        let expired = Turn::begin(set, Arc::downgrade(&operations));
        drop(expired.expiry());
        assert_eq!(
            expired.call(0, 1).await,
            Err(InvocationError::TurnExpired(set))
        );

        // The turn does not keep the operations alive.
        let orphaned = Turn::begin(set, Arc::downgrade(&operations));
        drop(operations);
        assert_eq!(
            orphaned.call(0, 1).await,
            Err(InvocationError::TurnExpired(set))
        );
    }
}
