//! The process-wide command entry point.
//!
//! Callers always go through a [`CmpHandle`]. It starts out backed by a
//! [`QueuingHandle`] that only records commands; once the store has booted it
//! is swapped for a [`ReadyHandle`] that first drains the recorded commands in
//! arrival order and then executes new ones directly. The swap and the drain
//! happen under one lock, so no call can overtake a queued one.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use super::{Command, CommandProcessor};
use crate::errors::CmpError;
use crate::store::SharedStore;

/// Lifecycle state of the command entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessorState {
    /// Stub installed, boot not started
    Uninitialized,
    /// Boot in progress, commands are queued
    Queuing,
    /// Commands execute against the store
    Ready,
    /// Boot failed before the store existed, commands are rejected
    Failed,
    /// Torn down on shutdown, commands are rejected
    TornDown,
}

/// Stub that records commands until the processor exists.
#[derive(Debug)]
pub struct QueuingHandle {
    state: ProcessorState,
    queue: Vec<Command>,
}

impl QueuingHandle {
    fn new() -> Self {
        Self {
            state: ProcessorState::Uninitialized,
            queue: Vec::new(),
        }
    }

    fn enqueue(&mut self, command: Command) {
        tracing::debug!("Queuing command {} until the CMP is loaded", command.name);
        self.queue.push(command);
    }

    /// Hand the recorded commands over to the real processor.
    fn into_ready(self, processor: CommandProcessor) -> (ReadyHandle, Vec<Command>) {
        (ReadyHandle { processor }, self.queue)
    }
}

/// Handle backed by the real processor.
pub struct ReadyHandle {
    processor: CommandProcessor,
}

impl ReadyHandle {
    pub fn processor(&self) -> &CommandProcessor {
        &self.processor
    }
}

enum Slot {
    Queuing(QueuingHandle),
    Ready(ReadyHandle),
    Failed(CmpError),
    TornDown,
}

/// Cloneable indirection in front of whichever handle is current.
#[derive(Clone)]
pub struct CmpHandle {
    slot: Arc<Mutex<Slot>>,
}

impl Default for CmpHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CmpHandle {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Queuing(QueuingHandle::new()))),
        }
    }

    /// Invoke a command. Before the processor is installed the command is queued
    /// and its callback fires when the queue drains.
    pub async fn call(&self, command: Command) {
        let mut slot = self.slot.lock().await;
        match &mut *slot {
            Slot::Queuing(stub) => stub.enqueue(command),
            Slot::Ready(ready) => ready.processor.process(command).await,
            Slot::Failed(error) => command.complete(Err(error.clone())),
            Slot::TornDown => command.complete(Err(CmpError::NotReady(
                "CMP has been torn down".to_string(),
            ))),
        }
    }

    pub async fn state(&self) -> ProcessorState {
        match &*self.slot.lock().await {
            Slot::Queuing(stub) => stub.state,
            Slot::Ready(_) => ProcessorState::Ready,
            Slot::Failed(_) => ProcessorState::Failed,
            Slot::TornDown => ProcessorState::TornDown,
        }
    }

    pub async fn queued(&self) -> usize {
        match &*self.slot.lock().await {
            Slot::Queuing(stub) => stub.queue.len(),
            _ => 0,
        }
    }

    /// The store behind the processor, once installed.
    pub async fn store(&self) -> Option<SharedStore> {
        match &*self.slot.lock().await {
            Slot::Ready(ready) => Some(ready.processor().store().clone()),
            _ => None,
        }
    }

    /// Mark that boot has started.
    pub async fn begin_boot(&self) {
        if let Slot::Queuing(stub) = &mut *self.slot.lock().await {
            stub.state = ProcessorState::Queuing;
        }
    }

    /// Swap the stub for the real processor and drain the queue in order.
    pub async fn install(&self, processor: CommandProcessor) -> Result<(), CmpError> {
        let mut slot = self.slot.lock().await;
        let previous = std::mem::replace(&mut *slot, Slot::TornDown);
        match previous {
            Slot::Queuing(stub) => {
                let (ready, queue) = stub.into_ready(processor);
                ready.processor.process_queue(queue).await;
                *slot = Slot::Ready(ready);
                Ok(())
            }
            Slot::Ready(_) => {
                tracing::warn!("CMP processor already installed; replacing it");
                *slot = Slot::Ready(ReadyHandle { processor });
                Ok(())
            }
            Slot::Failed(error) => {
                *slot = Slot::Failed(error.clone());
                Err(error)
            }
            Slot::TornDown => Err(CmpError::NotReady(
                "CMP was torn down before it finished loading".to_string(),
            )),
        }
    }

    /// Boot cannot produce a store: reject everything queued so far and every
    /// later call with `error`.
    pub async fn fail_pending(&self, error: &CmpError) {
        let mut slot = self.slot.lock().await;
        if !matches!(&*slot, Slot::Queuing(_)) {
            return;
        }
        if let Slot::Queuing(stub) = std::mem::replace(&mut *slot, Slot::Failed(error.clone())) {
            for command in stub.queue {
                command.complete(Err(error.clone()));
            }
        }
    }

    /// Drop the processor; later calls are rejected.
    pub async fn teardown(&self) {
        let mut slot = self.slot.lock().await;
        if let Slot::Queuing(stub) = std::mem::replace(&mut *slot, Slot::TornDown) {
            for command in stub.queue {
                command.complete(Err(CmpError::NotReady(
                    "CMP has been torn down".to_string(),
                )));
            }
        }
        tracing::info!("CMP handle torn down");
    }
}
