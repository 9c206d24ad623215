//! Core identifier types for the signal channel
//!
//! Tokens, entity tags and message ids are opaque to this crate: they are
//! produced and interpreted by the transport collaborator and only compared or
//! hashed here.

use core::fmt;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Message Id
// ----------------------------------------------------------------------------

/// 16-bit message id assigned by the transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u16);

impl MessageId {
    pub fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Token
// ----------------------------------------------------------------------------

/// Request token (0-8 bytes) correlating requests, responses and notifications
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Token(Vec<u8>);

impl Token {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The empty token used by pings and empty acknowledgements
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl From<&[u8]> for Token {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

// ----------------------------------------------------------------------------
// Entity Tag
// ----------------------------------------------------------------------------

/// Entity tag identifying one version of a block-wise representation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Etag(Vec<u8>);

impl Etag {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

// ----------------------------------------------------------------------------
// Message Key
// ----------------------------------------------------------------------------

/// Key correlating an outbound message with its in-flight task and response
///
/// Requests carrying a token are keyed by the token, so a non-confirmable
/// response with a fresh message id still finds its task. Token-less messages
/// (pings) fall back to the message id, which the matching reset echoes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKey(String);

impl MessageKey {
    pub fn new(message_id: MessageId, token: &Token) -> Self {
        if token.is_empty() {
            Self(format!("#{}", message_id))
        } else {
            Self(format!("[{}]", token))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_key_prefers_token() {
        let token = Token::new(vec![0xde, 0xad]);
        assert_eq!(MessageKey::new(MessageId(7), &token).as_str(), "[dead]");
        assert_eq!(
            MessageKey::new(MessageId(7), &token),
            MessageKey::new(MessageId(8), &token)
        );
    }

    #[test]
    fn message_key_falls_back_to_id() {
        let key = MessageKey::new(MessageId(513), &Token::empty());
        assert_eq!(key.to_string(), "#513");
    }
}
