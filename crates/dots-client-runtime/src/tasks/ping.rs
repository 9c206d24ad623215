//! Ping generator
//!
//! Session-level liveness probe: an empty confirmable message the server
//! answers with a reset. Each ping waits up to twice the interval.

use core::time::Duration;

use dots_client_core::MessageKey;
use tokio::task::JoinHandle;

use super::message::RetryParams;
use super::spawn_periodic;
use crate::task::{EventSender, StopHandle, StopSignal, TaskId, TaskRef};

#[derive(Debug)]
pub struct PingTask {
    id: TaskId,
    interval: Duration,
    current: Option<MessageKey>,
    stop: StopHandle,
    signal: Option<StopSignal>,
}

impl PingTask {
    pub fn new(interval: Duration) -> Self {
        let (stop, signal) = StopHandle::new();
        Self {
            id: TaskId::new(),
            interval,
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

    /// Pings with a zero interval are never started
    pub fn is_runnable(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Parameters of each ping message: no local retransmission
    pub fn message_params(&self) -> RetryParams {
        RetryParams::new(Duration::ZERO, 0, self.interval * 2)
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
        Some(spawn_periodic(
            TaskRef::Ping { id: self.id },
            self.interval,
            out,
            signal,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_disables_pings() {
        assert!(!PingTask::new(Duration::ZERO).is_runnable());

        let ping = PingTask::new(Duration::from_secs(15));
        assert!(ping.is_runnable());
        assert_eq!(ping.message_params().retry, 0);
        assert_eq!(ping.message_params().timeout, Duration::from_secs(30));
    }
}
