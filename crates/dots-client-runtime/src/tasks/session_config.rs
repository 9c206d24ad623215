//! Session configuration refresh
//!
//! Re-requests the signal session configuration every `interval` from a
//! request template; each firing reuses the template with a fresh message id.

use core::time::Duration;

use dots_client_core::{MessageKey, Pdu};
use tokio::task::JoinHandle;
use tracing::info;

use super::message::RetryParams;
use super::spawn_periodic;
use crate::task::{EventSender, StopHandle, StopSignal, TaskId, TaskRef};

#[derive(Debug)]
pub struct SessionConfigTask {
    id: TaskId,
    template: Pdu,
    interval: Duration,
    params: RetryParams,
    current: Option<MessageKey>,
    stop: StopHandle,
    signal: Option<StopSignal>,
}

impl SessionConfigTask {
    pub fn new(template: Pdu, interval: Duration, params: RetryParams) -> Self {
        let (stop, signal) = StopHandle::new();
        Self {
            id: TaskId::new(),
            template,
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

    pub fn template(&self) -> &Pdu {
        &self.template
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn params(&self) -> RetryParams {
        self.params
    }

    pub fn current(&self) -> Option<&MessageKey> {
        self.current.as_ref()
    }

    pub(crate) fn set_current(&mut self, key: MessageKey) {
        self.current = Some(key);
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub(crate) fn start(&mut self, out: EventSender) -> Option<JoinHandle<()>> {
        let signal = self.signal.take()?;
        info!("Refreshing session config every {:?}", self.interval);
        Some(spawn_periodic(
            TaskRef::SessionConfig { id: self.id },
            self.interval,
            out,
            signal,
        ))
    }
}
