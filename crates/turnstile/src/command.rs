// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Request/response plumbing between wrapped operations and their set's driver task.
//!
//! Each admitted invocation travels to the driver as a [`Command`] carrying its arguments and
//! the sending half of a oneshot channel. The caller keeps the receiving half inside its
//! [`PendingResult`](crate::PendingResult).

use std::fmt;

use tokio::sync::{mpsc, oneshot};

pub(crate) type CommandSender<T, R> = mpsc::UnboundedSender<Command<T, R>>;
pub(crate) type CommandReceiver<T, R> = mpsc::UnboundedReceiver<Command<T, R>>;
pub(crate) type CommandResponseReceiver<R> = oneshot::Receiver<R>;

pub(crate) fn command_channel<T, R>() -> (CommandSender<T, R>, CommandReceiver<T, R>) {
    mpsc::unbounded_channel()
}

pub(crate) struct CommandResponseSender<R> {
    tx: oneshot::Sender<R>,
}

impl<R> CommandResponseSender<R> {
    /// Settles the command. Gives the response back if the issuer is no longer listening.
    pub fn send(self, response: R) -> Result<(), R> {
        self.tx.send(response)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub(crate) struct Command<T, R> {
    payload: T,
    response_tx: CommandResponseSender<R>,
}

impl<T, R> Command<T, R> {
    pub fn prepare(payload: T) -> (Self, CommandResponseReceiver<R>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                payload,
                response_tx: CommandResponseSender { tx },
            },
            rx,
        )
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_inner(self) -> (T, CommandResponseSender<R>) {
        (self.payload, self.response_tx)
    }
}

impl<T: fmt::Debug, R> fmt::Debug for Command<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command(payload: {:?})", self.payload)
    }
}
