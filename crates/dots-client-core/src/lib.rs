//! DOTS Signal Client Core
//!
//! This crate provides the protocol-facing value types (PDUs, block
//! descriptors, tokens and message keys), the error taxonomy, the client
//! configuration and the contract of the transport collaborator used by the
//! signal channel session manager in `dots-client-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod block;
pub mod config;
pub mod errors;
pub mod messages;
pub mod pdu;
pub mod session;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use block::{Block, LARGEST_SZX, MAX_BLOCK_NUM};
pub use config::{
    BlockSizeConfig, ChannelConfig, ClientConfig, DriverConfig, MessageTaskConfig,
    RetransmitParams, SessionDefaults,
};
pub use errors::{BlockError, ConfigError, DotsError, DotsResult, SessionError};
pub use pdu::{Code, MessageType, OptionKey, Pdu, PduOption};
pub use session::{NackReason, SignalContext, SignalSession, TransportEvent};
pub use types::{Etag, MessageId, MessageKey, Token};
