//! Timed task implementations
//!
//! - [`MessageTask`]: one outbound message with retransmission and timeout
//! - [`HeartBeatTask`], [`PingTask`]: periodic keepalive generators
//! - [`SessionConfigTask`]: periodic session configuration refresh
//!
//! The periodic variants share one loop: wait for the interval, emit a firing
//! event, repeat until stopped. What a firing does is decided by the
//! environment's handler, which keeps at most one message of each kind in
//! flight.

use core::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::task::{emit, Event, EventSender, StopSignal, TaskRef};

pub mod heartbeat;
pub mod message;
pub mod ping;
pub mod session_config;

pub use heartbeat::HeartBeatTask;
pub use message::{MessageOrigin, MessageTask, PendingResponse, ResponseOutcome, RetryParams};
pub use ping::PingTask;
pub use session_config::SessionConfigTask;

/// Spawn the shared periodic loop
pub(crate) fn spawn_periodic(
    task: TaskRef,
    interval: Duration,
    out: EventSender,
    mut stop: StopSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => {
                    debug!("Periodic task {} ended", task.id());
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }
            if !emit(&out, &mut stop, Event::fire(task.clone())).await {
                debug!("Periodic task {} ended", task.id());
                return;
            }
        }
    })
}
