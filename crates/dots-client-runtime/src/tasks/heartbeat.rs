//! Heartbeat generator
//!
//! Fires every `interval`; on each firing the environment sends a heartbeat
//! message unless the previous one is still in flight.

use core::time::Duration;

use dots_client_core::MessageKey;
use tokio::task::JoinHandle;

use super::message::RetryParams;
use super::spawn_periodic;
use crate::task::{EventSender, StopHandle, StopSignal, TaskId, TaskRef};

#[derive(Debug)]
pub struct HeartBeatTask {
    id: TaskId,
    interval: Duration,
    params: RetryParams,
    current: Option<MessageKey>,
    stop: StopHandle,
    signal: Option<StopSignal>,
}

impl HeartBeatTask {
    /// `params` apply to each heartbeat message this task sends
    pub fn new(interval: Duration, params: RetryParams) -> Self {
        let (stop, signal) = StopHandle::new();
        Self {
            id: TaskId::new(),
            interval,
            params,
            current: None,
            stop,
            signal: Some(signal),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn params(&self) -> RetryParams {
        self.params
    }

    /// Key of the last heartbeat message sent
    pub fn current(&self) -> Option<&MessageKey> {
        self.current.as_ref()
    }

    pub(crate) fn set_current(&mut self, key: MessageKey) {
        self.current = Some(key);
    }

    pub fn is_runnable(&self) -> bool {
        !self.interval.is_zero()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub(crate) fn start(&mut self, out: EventSender) -> Option<JoinHandle<()>> {
        let signal = self.signal.take()?;
        Some(spawn_periodic(
            TaskRef::HeartBeat { id: self.id },
            self.interval,
            out,
            signal,
        ))
    }
}
