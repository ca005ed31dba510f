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
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task_local;
use tracing::{Instrument, debug, debug_span, trace};

use crate::command::{Command, CommandReceiver, CommandSender, command_channel};
use crate::error::{ExclusionError, InvocationError};
use crate::handle::{Outcome, PendingResult};
use crate::operation::Operation;
use crate::options::SerializerOptions;
use crate::slow::SlowTurnExt;
use crate::turn::{SetId, Turn};

task_local! {
    // Set whose turn the current task is executing
    static ACTIVE_SET: SetId;
}

/// Wraps `operations` into one serialization domain.
///
/// Returns the wrapped operations in the same order. Invocations of any of them execute one at
/// a time, in the order they were made. Must be called from within a tokio runtime.
pub fn wrap<A, R>(
    operations: impl IntoIterator<Item = Operation<A, R>>,
) -> Result<Vec<WrappedOperation<A, R>>, ExclusionError>
where
    A: Send + 'static,
    R: Send + 'static,
{
    OperationSet::new(operations).map(OperationSet::into_operations)
}

struct Invocation<A> {
    index: usize,
    sequence: u64,
    args: A,
}

impl<A> fmt::Debug for Invocation<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("index", &self.index)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    admitted: u64,
    started: u64,
    settled: u64,
}

impl Progress {
    fn queued(&self) -> usize {
        self.admitted.saturating_sub(self.started) as usize
    }

    fn outstanding(&self) -> usize {
        self.admitted.saturating_sub(self.settled) as usize
    }
}

/// Tail of the pending queue. Holding the lock while sending keeps sequence numbers in channel
/// order.
struct Admission<A, R> {
    next_sequence: u64,
    commands_tx: CommandSender<Invocation<A>, Outcome<R>>,
}

struct Shared<A, R> {
    id: SetId,
    name: Arc<str>,
    originals: Arc<[Operation<A, R>]>,
    reject_reentrant_calls: bool,
    admission: Mutex<Admission<A, R>>,
    progress: Arc<watch::Sender<Progress>>,
}

impl<A, R> Shared<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    fn admit(&self, index: usize, args: A) -> PendingResult<R> {
        if self.reject_reentrant_calls && holds_turn(self.id) {
            return PendingResult::rejected(self.id, InvocationError::ReentrantCall(self.id));
        }

        let mut admission = self.admission.lock();
        let sequence = admission.next_sequence;
        let (cmd, response_rx) = Command::prepare(Invocation {
            index,
            sequence,
            args,
        });
        // Counted before sending so the driver never observes more starts than admissions.
        self.progress.send_modify(|p| p.admitted += 1);
        if admission.commands_tx.send(cmd).is_err() {
            self.progress.send_modify(|p| p.admitted -= 1);
            return PendingResult::rejected(self.id, InvocationError::Closed(self.id));
        }
        admission.next_sequence += 1;
        drop(admission);

        trace!(set = %self.name, op = index, seq = sequence, "Admitted invocation");
        PendingResult::queued(self.id, sequence, response_rx)
    }
}

fn holds_turn(set: SetId) -> bool {
    ACTIVE_SET.try_with(|active| *active == set).unwrap_or(false)
}

/// An [`Operation`] bound to an [`OperationSet`].
///
/// Cloning yields another handle to the same wrapped operation.
pub struct WrappedOperation<A, R> {
    index: usize,
    shared: Arc<Shared<A, R>>,
}

impl<A, R> WrappedOperation<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Queues an invocation behind every invocation admitted earlier in the same set.
    ///
    /// Returns immediately. The operation starts once all earlier invocations have settled,
    /// whether they succeeded, failed or panicked.
    ///
    /// Calling this from inside a running operation of the same set and awaiting the result
    /// would wait on itself; use [`Turn::call`] or [`call_in_turn`](Self::call_in_turn) there.
    /// Such calls settle with [`InvocationError::ReentrantCall`] unless
    /// [`reject_reentrant_calls`](SerializerOptions::reject_reentrant_calls) is turned off.
    /// This includes fire-and-forget calls whose handle is never awaited: with the option
    /// turned off they are admitted and run after the current turn.
    pub fn call(&self, args: A) -> PendingResult<R> {
        self.shared.admit(self.index, args)
    }

    /// Runs the operation inline as part of the turn `turn` belongs to, bypassing the queue.
    ///
    /// Only the turn handed to a running operation of this same set is accepted. The call is
    /// not ordered relative to the queue: it executes exactly where it is awaited.
    pub async fn call_in_turn(&self, turn: &Turn<A, R>, args: A) -> Result<R, InvocationError> {
        let set = self.shared.id;
        if turn.set_id() != Some(set) {
            return Err(InvocationError::ForeignTurn { expected: set });
        }
        if !turn.is_active() {
            return Err(InvocationError::TurnExpired(set));
        }

        trace!(set = %self.shared.name, op = self.index, "Running escape-hatch call");
        Ok(self.original().invoke(turn.reenter(), args).await)
    }
}

impl<A, R> WrappedOperation<A, R> {
    /// The operation this wraps. Calling it bypasses all serialization.
    pub fn original(&self) -> &Operation<A, R> {
        &self.shared.originals[self.index]
    }

    /// Position of this operation within its set.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_id(&self) -> SetId {
        self.shared.id
    }
}

impl<A, R> Clone for WrappedOperation<A, R> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A, R> fmt::Debug for WrappedOperation<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedOperation")
            .field("set", &self.shared.id)
            .field("name", &self.shared.name)
            .field("index", &self.index)
            .finish()
    }
}

/// A group of operations sharing one pending queue.
///
/// At most one invocation across the whole set executes at a time, and queued invocations start
/// in admission order. Separate sets never wait on each other.
///
/// The queue is drained by a task spawned on construction. It keeps running while any wrapped
/// operation of the set is alive, and finishes the invocations already admitted after the last
/// one is dropped.
pub struct OperationSet<A, R> {
    shared: Arc<Shared<A, R>>,
    operations: Vec<WrappedOperation<A, R>>,
}

impl<A, R> OperationSet<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Wraps `operations` with default options on the current runtime.
    pub fn new(
        operations: impl IntoIterator<Item = Operation<A, R>>,
    ) -> Result<Self, ExclusionError> {
        OperationSetBuilder::default().operations(operations).build()
    }

    pub fn builder() -> OperationSetBuilder<A, R> {
        OperationSetBuilder::default()
    }

    /// Looks up the original behind `wrapped`, provided it was produced by this set.
    pub fn original(
        &self,
        wrapped: &WrappedOperation<A, R>,
    ) -> Result<Operation<A, R>, ExclusionError> {
        if wrapped.set_id() != self.shared.id {
            return Err(ExclusionError::ForeignOperation {
                expected: self.shared.id,
                found: wrapped.set_id(),
            });
        }
        Ok(self.shared.originals[wrapped.index].clone())
    }
}

impl<A, R> OperationSet<A, R> {
    pub fn id(&self) -> SetId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Always false; a set cannot be built without operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&WrappedOperation<A, R>> {
        self.operations.get(index)
    }

    pub fn operations(&self) -> &[WrappedOperation<A, R>] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<WrappedOperation<A, R>> {
        self.operations
    }

    /// Invocations admitted but not yet started.
    pub fn queued(&self) -> usize {
        self.shared.progress.borrow().queued()
    }

    /// Invocations admitted but not yet settled, including the one currently running.
    pub fn outstanding(&self) -> usize {
        self.shared.progress.borrow().outstanding()
    }

    /// Resolves once every invocation admitted so far has settled.
    pub async fn idle(&self) {
        let mut progress_rx = self.shared.progress.subscribe();
        // The driver settles everything still outstanding when it goes away, so this also
        // resolves after the runtime it was spawned on shuts down.
        let _ = progress_rx.wait_for(|p| p.outstanding() == 0).await;
    }
}

impl<A, R> fmt::Debug for OperationSet<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationSet")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("len", &self.operations.len())
            .field("progress", &*self.shared.progress.borrow())
            .finish()
    }
}

/// Configures and builds an [`OperationSet`].
pub struct OperationSetBuilder<A, R> {
    name: Option<String>,
    options: Option<SerializerOptions>,
    runtime_handle: Option<tokio::runtime::Handle>,
    operations: Vec<Operation<A, R>>,
}

impl<A, R> Default for OperationSetBuilder<A, R> {
    fn default() -> Self {
        Self {
            name: None,
            options: None,
            runtime_handle: None,
            operations: Vec::new(),
        }
    }
}

impl<A, R> OperationSetBuilder<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Name used in log events. Defaults to the set id.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn options(mut self, options: SerializerOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Runtime the queue driver is spawned on. Defaults to the current runtime.
    pub fn runtime_handle(mut self, handle: tokio::runtime::Handle) -> Self {
        self.runtime_handle = Some(handle);
        self
    }

    pub fn operation(mut self, operation: Operation<A, R>) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn operations(mut self, operations: impl IntoIterator<Item = Operation<A, R>>) -> Self {
        self.operations.extend(operations);
        self
    }

    pub fn build(self) -> Result<OperationSet<A, R>, ExclusionError> {
        if self.operations.is_empty() {
            return Err(ExclusionError::EmptyOperationSet);
        }

        let id = SetId::next();
        let name: Arc<str> = self.name.unwrap_or_else(|| id.to_string()).into();
        let runtime_handle = match self.runtime_handle {
            Some(handle) => handle,
            None => tokio::runtime::Handle::try_current().map_err(|source| {
                ExclusionError::NoRuntime {
                    name: name.to_string(),
                    source,
                }
            })?,
        };
        let options = self.options.unwrap_or_default();

        let originals: Arc<[Operation<A, R>]> = self.operations.into();
        let (commands_tx, commands_rx) = command_channel();
        let (progress, _) = watch::channel(Progress::default());
        let progress = Arc::new(progress);

        let driver = Driver {
            id,
            name: Arc::clone(&name),
            originals: Arc::clone(&originals),
            options: options.clone(),
            progress: Arc::clone(&progress),
            commands_rx,
        };
        runtime_handle.spawn(driver.run());
        debug!(set = %name, operations = originals.len(), "Created operation set");

        let shared = Arc::new(Shared {
            id,
            name,
            originals: Arc::clone(&originals),
            reject_reentrant_calls: options.reject_reentrant_calls,
            admission: Mutex::new(Admission {
                next_sequence: 1,
                commands_tx,
            }),
            progress,
        });
        let operations = (0..originals.len())
            .map(|index| WrappedOperation {
                index,
                shared: Arc::clone(&shared),
            })
            .collect();

        Ok(OperationSet { shared, operations })
    }
}

/// Drains the pending queue of one set, one turn at a time.
///
/// Holds no sender of its own queue, so it stops once every wrapped operation is gone and the
/// remaining invocations have run. If it is dropped early, because its runtime shut down, every
/// invocation still admitted settles with [`InvocationError::Closed`].
struct Driver<A, R> {
    id: SetId,
    name: Arc<str>,
    originals: Arc<[Operation<A, R>]>,
    options: SerializerOptions,
    progress: Arc<watch::Sender<Progress>>,
    commands_rx: CommandReceiver<Invocation<A>, Outcome<R>>,
}

impl<A, R> Driver<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    async fn run(mut self) {
        while let Some(cmd) = self.commands_rx.recv().await {
            // Leaving the queue happens here, at the start of the turn.
            self.progress.send_modify(|p| p.started += 1);
            let span = debug_span!(
                "turn",
                set = %self.name,
                op = cmd.payload().index,
                seq = cmd.payload().sequence
            );
            let (invocation, response_tx) = cmd.into_inner();
            if response_tx.is_closed() {
                span.in_scope(|| {
                    trace!("Caller dropped its handle, running the invocation anyway")
                });
            }

            let outcome = self.take_turn(invocation).instrument(span.clone()).await;

            self.progress.send_modify(|p| p.settled += 1);
            if response_tx.send(outcome).is_err() {
                span.in_scope(|| debug!("Caller dropped its handle, discarding outcome"));
            }
        }
        trace!(set = %self.name, "Operation set has no more handles, driver stopped");
    }

    async fn take_turn(&self, invocation: Invocation<A>) -> Outcome<R> {
        trace!("Turn started");
        let turn = Turn::begin(self.id, Arc::downgrade(&self.originals));
        let expiry = turn.expiry();
        let operation = &self.originals[invocation.index];
        let execution = ACTIVE_SET.scope(
            self.id,
            AssertUnwindSafe(operation.invoke(turn.reenter(), invocation.args)).catch_unwind(),
        );

        let result = match self.options.slow_turn_threshold() {
            Some(threshold) => {
                let label = format!(
                    "Invocation #{} (operation {}) on {}",
                    invocation.sequence, invocation.index, self.name
                );
                execution.warn_when_slow(threshold, label).await
            }
            None => execution.await,
        };
        drop(expiry);
        trace!("Turn finished");

        result.map_err(|panic| InvocationError::Panicked(panic_message(&*panic)))
    }
}

impl<A, R> Drop for Driver<A, R> {
    fn drop(&mut self) {
        // Later admissions fail with `Closed`; commands left in the channel drop their response
        // senders, which settles the matching handles with `Closed` too.
        self.commands_rx.close();
        let mut abandoned = 0;
        self.progress.send_modify(|p| {
            abandoned = p.admitted.saturating_sub(p.settled);
            p.started = p.started.max(p.admitted);
            p.settled = p.settled.max(p.admitted);
        });
        if abandoned > 0 {
            debug!(set = %self.name, abandoned, "Driver stopped with invocations outstanding");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
