//! Error types for the DOTS signal client
//!
//! This module contains the error taxonomy shared by the core and runtime
//! crates: session/transport errors, block option errors, configuration errors
//! and the `DotsError` type that unifies them.

use crate::types::MessageKey;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors raised by the transport session collaborator
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session {session} has already been released")]
    Released { session: String },
    #[error("Send failed on session {session}: {reason}")]
    SendFailed { session: String, reason: String },
    #[error("Failed to establish a new session: {reason}")]
    ConnectFailed { reason: String },
    #[error("Transport poll failed: {reason}")]
    PollFailed { reason: String },
}

/// Errors raised while decoding block-wise transfer options
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("Option {option} is not present")]
    MissingOption { option: &'static str },
    #[error("Option {option} is {length} bytes long (max 4)")]
    OptionTooLong { option: &'static str, length: usize },
    #[error("Block number {num} is out of range (max {max})")]
    NumOutOfRange { num: u32, max: u32 },
    #[error("Block size exponent {szx} is out of range (max {max})")]
    InvalidSzx { szx: u8, max: u8 },
    #[error("Block descriptor '{value}' is malformed, expected NUM/M/SIZE")]
    Malformed { value: String },
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Unified error type for the DOTS signal client
#[derive(Debug, thiserror::Error)]
pub enum DotsError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Block-wise transfer error: {0}")]
    Block(#[from] BlockError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Message body encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("A task for message {key} is already in flight")]
    DuplicateInFlight { key: MessageKey },
}

impl DotsError {
    /// Whether this error must be propagated to the process boundary
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DotsError::Session(SessionError::ConnectFailed { .. }) | DotsError::Config(_)
        )
    }
}

/// Result type alias for DOTS client operations
pub type DotsResult<T> = core::result::Result<T, DotsError>;
