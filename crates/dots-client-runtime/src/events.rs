//! Client-facing events
//!
//! Outcomes the application cares about but that are not answers to a
//! specific request: session configuration updates, observe notifications and
//! connection-level keepalive state.

use dots_client_core::{Pdu, Token};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A session configuration response arrived
    SessionConfig(Pdu),
    /// A notification for an observed token
    Notification { token: Token, pdu: Pdu },
    /// A heartbeat or ping went unanswered
    HeartBeatMissed { missing: u32, allowed: u32 },
    /// The connection must be re-established
    ReconnectRequested { reason: String },
    /// A new session took over
    SessionReplaced,
}

pub type ClientEventSender = mpsc::Sender<ClientEvent>;
pub type ClientEventReceiver = mpsc::Receiver<ClientEvent>;

/// Create bounded client event channel (Environment -> application)
pub fn create_client_event_channel(buffer_size: usize) -> (ClientEventSender, ClientEventReceiver) {
    mpsc::channel(buffer_size)
}
