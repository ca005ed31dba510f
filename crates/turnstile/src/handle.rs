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
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use crate::command::CommandResponseReceiver;
use crate::error::InvocationError;
use crate::turn::SetId;

pub(crate) type Outcome<R> = Result<R, InvocationError>;

enum State<R> {
    Queued(CommandResponseReceiver<Outcome<R>>),
    Rejected(Option<InvocationError>),
}

/// The eventual outcome of one queued invocation.
///
/// Returned immediately by [`WrappedOperation::call`](crate::WrappedOperation::call). Awaiting
/// it yields whatever the operation returned once its turn came and it finished. Dropping the
/// handle does not withdraw the invocation: it still runs in its turn and its outcome is
/// discarded.
#[must_use = "the invocation runs regardless, but its outcome is lost unless awaited"]
pub struct PendingResult<R> {
    set: SetId,
    sequence: Option<u64>,
    state: State<R>,
}

impl<R> PendingResult<R> {
    pub(crate) fn queued(
        set: SetId,
        sequence: u64,
        rx: CommandResponseReceiver<Outcome<R>>,
    ) -> Self {
        Self {
            set,
            sequence: Some(sequence),
            state: State::Queued(rx),
        }
    }

    /// A handle that was never admitted to the queue.
    pub(crate) fn rejected(set: SetId, err: InvocationError) -> Self {
        Self {
            set,
            sequence: None,
            state: State::Rejected(Some(err)),
        }
    }

    /// Position of this invocation in its set's admission order, starting at 1. `None` if the
    /// invocation was rejected before admission.
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn set_id(&self) -> SetId {
        self.set
    }
}

// Neither state is ever pinned structurally.
impl<R> Unpin for PendingResult<R> {}

impl<R> Future for PendingResult<R> {
    type Output = Outcome<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            State::Queued(rx) => {
                let outcome = ready!(Pin::new(rx).poll(cx));
                Poll::Ready(outcome.unwrap_or(Err(InvocationError::Closed(this.set))))
            }
            State::Rejected(err) => Poll::Ready(Err(err
                .take()
                .expect("PendingResult polled after completion"))),
        }
    }
}

impl<R> fmt::Debug for PendingResult<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Queued(_) => "queued",
            State::Rejected(_) => "rejected",
        };
        f.debug_struct("PendingResult")
            .field("set", &self.set)
            .field("sequence", &self.sequence)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;


    use crate::command::Command;

    #[tokio::test]
    async fn resolves_with_driver_response() {
        let set = SetId::next();
        let (cmd, rx) = Command::<(), Outcome<u32>>::prepare(());
        let handle = PendingResult::queued(set, 1, rx);
        assert_eq!(handle.sequence(), Some(1));

        let (_, response_tx) = cmd.into_inner();
        response_tx.send(Ok(5)).unwrap();
        assert_eq!(handle.await, Ok(5));
    }

    #[tokio::test]
    async fn vanished_driver_reports_closed() {
        let set = SetId::next();
        let (cmd, rx) = Command::<(), Outcome<u32>>::prepare(());
        drop(cmd);

        let handle = PendingResult::queued(set, 1, rx);
        assert_eq!(handle.await, Err(InvocationError::Closed(set)));
    }

    #[tokio::test]
    async fn rejected_handle_is_ready() {
        let set = SetId::next();
        let handle = PendingResult::<u32>::rejected(set, InvocationError::ReentrantCall(set));
        assert_eq!(handle.sequence(), None);
        assert_eq!(handle.await, Err(InvocationError::ReentrantCall(set)));
    }
}
