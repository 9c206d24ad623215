//! Transport collaborator contract
//!
//! The transport session owns connection establishment, datagram security,
//! confirmable retransmission and PDU encoding. The session manager only sees
//! it through the two traits below:
//!
//! - [`SignalSession`]: one established session to the server, used to send
//!   PDUs and allocate message ids and tokens.
//! - [`SignalContext`]: the I/O context driving every session; polled for a
//!   bounded slice by the outer driver loop and asked to reconnect when the
//!   session is lost.

use core::fmt;
use core::time::Duration;

use crate::config::RetransmitParams;
use crate::errors::SessionError;
use crate::pdu::Pdu;
use crate::types::{MessageId, Token};

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// An established signal channel session
pub trait SignalSession: Send + fmt::Debug {
    /// Hand a PDU to the transport
    fn send(&mut self, pdu: &Pdu) -> Result<(), SessionError>;

    /// Allocate the next message id
    fn new_message_id(&mut self) -> MessageId;

    /// Allocate a fresh request token
    fn new_token(&mut self) -> Token;

    /// Apply confirmable retransmission parameters
    fn set_retransmit_params(&mut self, params: RetransmitParams);

    /// Release the session; the handle must not be used afterwards
    fn release(&mut self);

    /// Human readable peer description for logs
    fn describe(&self) -> String;
}

// ----------------------------------------------------------------------------
// Transport Events
// ----------------------------------------------------------------------------

/// Why an acknowledged send ultimately failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackReason {
    TooManyRetries,
    NotDeliverable,
    Reset,
    TlsFailed,
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NackReason::TooManyRetries => "too many retries",
            NackReason::NotDeliverable => "not deliverable",
            NackReason::Reset => "reset",
            NackReason::TlsFailed => "tls failed",
        };
        f.write_str(name)
    }
}

/// Callbacks surfaced by the transport while it is driven
#[derive(Debug)]
pub enum TransportEvent {
    /// An inbound response or notification
    Response(Pdu),
    /// A confirmable send was given up on by the transport
    Nack { sent: Pdu, reason: NackReason },
    /// A new session finished its handshake
    SessionConnected(Box<dyn SignalSession>),
    /// The active session was closed or errored
    SessionClosed { reason: String },
}

// ----------------------------------------------------------------------------
// Context
// ----------------------------------------------------------------------------

/// I/O context owning the transport sessions
#[async_trait::async_trait]
pub trait SignalContext: Send + fmt::Debug {
    /// Run transport I/O for at most `slice` and return what happened
    async fn drive(&mut self, slice: Duration) -> Result<Vec<TransportEvent>, SessionError>;

    /// Establish a fresh session to the same server
    ///
    /// An error here is fatal for the client.
    async fn reconnect(&mut self) -> Result<Box<dyn SignalSession>, SessionError>;
}
