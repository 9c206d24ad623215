//! Message task: transmission, retransmission and timeout of one message
//!
//! The loop emits a firing event immediately, then races the stop signal, the
//! retransmission interval and the overall deadline up to `retry` times.
//! Non-confirmable messages are re-sent by this loop on every interval and
//! report a single timeout once the deadline passes. Confirmable messages are
//! retransmitted by the transport itself, so after the race the loop only
//! waits to be stopped; their failure arrives as a negative acknowledgement.

use core::time::Duration;

use dots_client_core::{MessageKey, MessageTaskConfig, Pdu};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::task::{emit, Event, EventSender, StopHandle, StopSignal, TaskId, TaskRef};

// ----------------------------------------------------------------------------
// Parameters
// ----------------------------------------------------------------------------

/// Retransmission budget of a message task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryParams {
    pub interval: Duration,
    pub retry: u32,
    pub timeout: Duration,
}

impl RetryParams {
    pub fn new(interval: Duration, retry: u32, timeout: Duration) -> Self {
        Self {
            interval,
            retry,
            timeout,
        }
    }
}

impl From<&MessageTaskConfig> for RetryParams {
    fn from(config: &MessageTaskConfig) -> Self {
        Self::new(config.interval(), config.retry, config.timeout())
    }
}

/// Who started a message task; selects the response and timeout handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    Request,
    HeartBeat,
    Ping,
    SessionConfig,
}

// ----------------------------------------------------------------------------
// Message Task
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct MessageTask {
    id: TaskId,
    message: Pdu,
    key: MessageKey,
    params: RetryParams,
    origin: MessageOrigin,
    response_slot: Option<oneshot::Sender<Pdu>>,
    stop: StopHandle,
    signal: Option<StopSignal>,
}

impl MessageTask {
    pub fn new(message: Pdu, params: RetryParams, origin: MessageOrigin) -> Self {
        let (stop, signal) = StopHandle::new();
        Self {
            id: TaskId::new(),
            key: message.key(),
            message,
            params,
            origin,
            response_slot: None,
            stop,
            signal: Some(signal),
        }
    }

    /// Attach a single-slot response channel and return its waiting side
    pub fn with_response_slot(mut self) -> (Self, PendingResponse) {
        let (sender, receiver) = oneshot::channel();
        self.response_slot = Some(sender);
        let pending = PendingResponse {
            key: self.key.clone(),
            receiver,
            timeout: self.params.timeout,
        };
        (self, pending)
    }

    pub(crate) fn set_response_slot(&mut self, slot: Option<oneshot::Sender<Pdu>>) {
        self.response_slot = slot;
    }

    pub(crate) fn take_response_slot(&mut self) -> Option<oneshot::Sender<Pdu>> {
        self.response_slot.take()
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn key(&self) -> &MessageKey {
        &self.key
    }

    pub fn message(&self) -> &Pdu {
        &self.message
    }

    pub fn params(&self) -> RetryParams {
        self.params
    }

    pub fn origin(&self) -> MessageOrigin {
        self.origin
    }

    pub fn task_ref(&self) -> TaskRef {
        TaskRef::Message {
            id: self.id,
            key: self.key.clone(),
        }
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Start the timed loop; a task starts at most once
    pub(crate) fn start(&mut self, out: EventSender) -> Option<JoinHandle<()>> {
        let signal = self.signal.take()?;
        let task = self.task_ref();
        let confirmable = self.message.is_confirmable();
        let params = self.params;
        Some(tokio::spawn(run_message_loop(
            task,
            confirmable,
            params,
            out,
            signal,
        )))
    }
}

async fn run_message_loop(
    task: TaskRef,
    confirmable: bool,
    params: RetryParams,
    out: EventSender,
    mut stop: StopSignal,
) {
    let deadline = tokio::time::sleep(params.timeout);
    tokio::pin!(deadline);

    if !emit(&out, &mut stop, Event::fire(task.clone())).await {
        return;
    }

    for _ in 0..params.retry {
        tokio::select! {
            biased;
            _ = stop.stopped() => return,
            _ = &mut deadline => {
                emit(&out, &mut stop, Event::timeout(task.clone())).await;
                return;
            }
            _ = tokio::time::sleep(params.interval) => {
                if !confirmable && !emit(&out, &mut stop, Event::fire(task.clone())).await {
                    return;
                }
            }
        }
    }

    if confirmable {
        stop.stopped().await;
        return;
    }

    tokio::select! {
        biased;
        _ = stop.stopped() => {}
        _ = &mut deadline => {
            emit(&out, &mut stop, Event::timeout(task.clone())).await;
        }
    }
}

// ----------------------------------------------------------------------------
// Response Promise
// ----------------------------------------------------------------------------

/// Outcome of waiting on a message task's response slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Response(Pdu),
    TimedOut,
}

impl ResponseOutcome {
    pub fn into_response(self) -> Option<Pdu> {
        match self {
            ResponseOutcome::Response(pdu) => Some(pdu),
            ResponseOutcome::TimedOut => None,
        }
    }
}

/// Waiting side of a message task's response slot
#[derive(Debug)]
pub struct PendingResponse {
    key: MessageKey,
    receiver: oneshot::Receiver<Pdu>,
    timeout: Duration,
}

impl PendingResponse {
    pub fn key(&self) -> &MessageKey {
        &self.key
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait up to the task's own timeout
    pub async fn wait(self) -> ResponseOutcome {
        let timeout = self.timeout;
        self.await_with_timeout(timeout).await
    }

    /// Wait for the response, never longer than `timeout`
    ///
    /// A task that was stopped or dropped without a response resolves as
    /// timed out right away.
    pub async fn await_with_timeout(self, timeout: Duration) -> ResponseOutcome {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(pdu)) => ResponseOutcome::Response(pdu),
            Ok(Err(_)) | Err(_) => ResponseOutcome::TimedOut,
        }
    }
}
