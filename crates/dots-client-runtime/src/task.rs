//! Task and event plumbing
//!
//! Every task runs its own timed loop on the tokio runtime and talks back to
//! the environment only by pushing [`Event`]s onto the shared bounded queue.
//! A task never touches environment state directly.

use core::fmt;

use dots_client_core::MessageKey;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::tasks::{HeartBeatTask, MessageTask, PingTask, SessionConfigTask};

// ----------------------------------------------------------------------------
// Task Identity
// ----------------------------------------------------------------------------

/// Unique identity of one started task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Stop Signal
// ----------------------------------------------------------------------------

/// Owner side of a task's stop signal
///
/// Dropping the handle stops the task as well.
#[derive(Debug)]
pub struct StopHandle {
    sender: watch::Sender<bool>,
}

impl StopHandle {
    pub fn new() -> (Self, StopSignal) {
        let (sender, receiver) = watch::channel(false);
        (Self { sender }, StopSignal { receiver })
    }

    /// Signal the task; idempotent
    pub fn stop(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Task side of the stop signal, polled at every wait point
#[derive(Debug, Clone)]
pub struct StopSignal {
    receiver: watch::Receiver<bool>,
}

impl StopSignal {
    /// Resolves once a stop was requested or the handle was dropped
    pub async fn stopped(&mut self) {
        loop {
            let stopped = *self.receiver.borrow_and_update();
            if stopped {
                return;
            }
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Reference from an event back to the task that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRef {
    Message { id: TaskId, key: MessageKey },
    HeartBeat { id: TaskId },
    Ping { id: TaskId },
    SessionConfig { id: TaskId },
}

impl TaskRef {
    pub fn id(&self) -> TaskId {
        match self {
            TaskRef::Message { id, .. }
            | TaskRef::HeartBeat { id }
            | TaskRef::Ping { id }
            | TaskRef::SessionConfig { id } => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Normal firing: send a message or run a periodic step
    Fire,
    /// The task's overall timeout elapsed
    Timeout,
}

/// One entry on the shared event queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub task: TaskRef,
    pub kind: EventKind,
}

impl Event {
    pub fn fire(task: TaskRef) -> Self {
        Self {
            task,
            kind: EventKind::Fire,
        }
    }

    pub fn timeout(task: TaskRef) -> Self {
        Self {
            task,
            kind: EventKind::Timeout,
        }
    }
}

pub type EventSender = mpsc::Sender<Event>;
pub type EventReceiver = mpsc::Receiver<Event>;

/// Create the bounded task event queue
pub fn create_event_channel(buffer_size: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(buffer_size)
}

/// Push an event unless the task was stopped meanwhile
///
/// Returns `false` when the task must exit: either it was stopped while
/// waiting for queue capacity or the environment is gone.
pub(crate) async fn emit(out: &EventSender, stop: &mut StopSignal, event: Event) -> bool {
    if stop.is_stopped() {
        return false;
    }
    tokio::select! {
        biased;
        _ = stop.stopped() => false,
        sent = out.send(event) => sent.is_ok(),
    }
}

// ----------------------------------------------------------------------------
// Task Variants
// ----------------------------------------------------------------------------

/// Closed set of task kinds accepted by `Environment::run`
#[derive(Debug)]
pub enum Task {
    Message(MessageTask),
    HeartBeat(HeartBeatTask),
    Ping(PingTask),
    SessionConfig(SessionConfigTask),
}

impl Task {
    pub fn id(&self) -> TaskId {
        match self {
            Task::Message(t) => t.id(),
            Task::HeartBeat(t) => t.id(),
            Task::Ping(t) => t.id(),
            Task::SessionConfig(t) => t.id(),
        }
    }
}

impl From<MessageTask> for Task {
    fn from(task: MessageTask) -> Self {
        Task::Message(task)
    }
}

impl From<HeartBeatTask> for Task {
    fn from(task: HeartBeatTask) -> Self {
        Task::HeartBeat(task)
    }
}

impl From<PingTask> for Task {
    fn from(task: PingTask) -> Self {
        Task::Ping(task)
    }
}

impl From<SessionConfigTask> for Task {
    fn from(task: SessionConfigTask) -> Self {
        Task::SessionConfig(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_signal_resolves_after_stop() {
        let (handle, mut signal) = StopHandle::new();
        assert!(!signal.is_stopped());
        handle.stop();
        handle.stop();
        signal.stopped().await;
        assert!(signal.is_stopped());
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_task() {
        let (handle, mut signal) = StopHandle::new();
        drop(handle);
        signal.stopped().await;
        assert!(signal.is_stopped());
    }

    #[tokio::test]
    async fn emit_is_suppressed_once_stopped() {
        let (tx, mut rx) = create_event_channel(4);
        let (handle, mut signal) = StopHandle::new();
        let task = TaskRef::Ping { id: TaskId::new() };

        assert!(emit(&tx, &mut signal, Event::fire(task.clone())).await);
        handle.stop();
        assert!(!emit(&tx, &mut signal, Event::fire(task)).await);

        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Fire);
        assert!(rx.try_recv().is_err());
    }
}
