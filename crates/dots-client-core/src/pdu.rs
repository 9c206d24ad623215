//! Protocol data unit model
//!
//! The PDU is the unit exchanged with the transport collaborator. Encoding to
//! and from datagrams happens on the other side of [`crate::SignalSession`];
//! this module only exposes the header fields and typed option accessors the
//! session manager needs.

use core::fmt;

use crate::block::Block;
use crate::errors::BlockError;
use crate::types::{Etag, MessageId, MessageKey, Token};

// ----------------------------------------------------------------------------
// Message Type and Code
// ----------------------------------------------------------------------------

/// Delivery class of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

/// Request method or response code, `class.detail`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(pub u8);

impl Code {
    pub const EMPTY: Code = Code(0x00);
    pub const GET: Code = Code(0x01);
    pub const POST: Code = Code(0x02);
    pub const PUT: Code = Code(0x03);
    pub const DELETE: Code = Code(0x04);

    pub const CREATED: Code = Code::response(2, 1);
    pub const DELETED: Code = Code::response(2, 2);
    pub const VALID: Code = Code::response(2, 3);
    pub const CHANGED: Code = Code::response(2, 4);
    pub const CONTENT: Code = Code::response(2, 5);
    pub const BAD_REQUEST: Code = Code::response(4, 0);
    pub const NOT_FOUND: Code = Code::response(4, 4);
    pub const SERVICE_UNAVAILABLE: Code = Code::response(5, 3);

    pub const fn response(class: u8, detail: u8) -> Code {
        Code((class << 5) | detail)
    }

    pub fn class(&self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(&self) -> u8 {
        self.0 & 0x1f
    }

    pub fn is_request(&self) -> bool {
        self.class() == 0 && self.0 != 0
    }

    pub fn is_success(&self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

// ----------------------------------------------------------------------------
// Options
// ----------------------------------------------------------------------------

/// Option numbers used by the signal channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OptionKey {
    IfMatch = 1,
    UriHost = 3,
    ETag = 4,
    Observe = 6,
    UriPort = 7,
    UriPath = 11,
    ContentFormat = 12,
    MaxAge = 14,
    UriQuery = 15,
    Block2 = 23,
    Block1 = 27,
    Size2 = 28,
    Size1 = 60,
}

impl OptionKey {
    pub fn name(&self) -> &'static str {
        match self {
            OptionKey::IfMatch => "If-Match",
            OptionKey::UriHost => "Uri-Host",
            OptionKey::ETag => "ETag",
            OptionKey::Observe => "Observe",
            OptionKey::UriPort => "Uri-Port",
            OptionKey::UriPath => "Uri-Path",
            OptionKey::ContentFormat => "Content-Format",
            OptionKey::MaxAge => "Max-Age",
            OptionKey::UriQuery => "Uri-Query",
            OptionKey::Block2 => "Block2",
            OptionKey::Block1 => "Block1",
            OptionKey::Size2 => "Size2",
            OptionKey::Size1 => "Size1",
        }
    }

    fn is_repeatable(&self) -> bool {
        matches!(
            self,
            OptionKey::IfMatch | OptionKey::ETag | OptionKey::UriPath | OptionKey::UriQuery
        )
    }
}

/// A single option instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduOption {
    pub key: OptionKey,
    pub value: Vec<u8>,
}

/// Minimal big-endian encoding of an unsigned option value
fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

fn decode_uint(key: OptionKey, value: &[u8]) -> Result<u32, BlockError> {
    if value.len() > 4 {
        return Err(BlockError::OptionTooLong {
            option: key.name(),
            length: value.len(),
        });
    }
    Ok(value.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

// ----------------------------------------------------------------------------
// PDU
// ----------------------------------------------------------------------------

/// A signal channel message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub message_type: MessageType,
    pub code: Code,
    pub message_id: MessageId,
    pub token: Token,
    /// Options kept sorted by option number, repeated options in insertion order
    options: Vec<PduOption>,
    pub data: Vec<u8>,
}

impl Pdu {
    pub fn new(message_type: MessageType, code: Code, message_id: MessageId, token: Token) -> Self {
        Self {
            message_type,
            code,
            message_id,
            token,
            options: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Key correlating this message with its in-flight task
    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.message_id, &self.token)
    }

    pub fn is_confirmable(&self) -> bool {
        self.message_type == MessageType::Confirmable
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    pub fn options(&self) -> &[PduOption] {
        &self.options
    }

    /// Add an option, replacing any previous value of a non-repeatable option
    pub fn add_option(&mut self, key: OptionKey, value: impl Into<Vec<u8>>) {
        if !key.is_repeatable() {
            self.remove_option(key);
        }
        let position = self
            .options
            .iter()
            .position(|o| o.key > key)
            .unwrap_or(self.options.len());
        self.options.insert(
            position,
            PduOption {
                key,
                value: value.into(),
            },
        );
    }

    pub fn set_option_uint(&mut self, key: OptionKey, value: u32) {
        self.add_option(key, encode_uint(value));
    }

    pub fn remove_option(&mut self, key: OptionKey) {
        self.options.retain(|o| o.key != key);
    }

    /// First value of an option
    pub fn option(&self, key: OptionKey) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|o| o.key == key)
            .map(|o| o.value.as_slice())
    }

    pub fn option_values(&self, key: OptionKey) -> impl Iterator<Item = &[u8]> {
        self.options
            .iter()
            .filter(move |o| o.key == key)
            .map(|o| o.value.as_slice())
    }

    /// Unsigned integer option; `Ok(None)` when absent
    pub fn option_uint(&self, key: OptionKey) -> Result<Option<u32>, BlockError> {
        self.option(key).map(|v| decode_uint(key, v)).transpose()
    }

    // ------------------------------------------------------------------------
    // Typed accessors
    // ------------------------------------------------------------------------

    pub fn block2(&self) -> Result<Block, BlockError> {
        let value = self
            .option_uint(OptionKey::Block2)?
            .ok_or(BlockError::MissingOption { option: "Block2" })?;
        Block::from_value(value)
    }

    pub fn set_block2(&mut self, block: Block) {
        self.set_option_uint(OptionKey::Block2, block.to_value());
    }

    pub fn has_block2(&self) -> bool {
        self.option(OptionKey::Block2).is_some()
    }

    pub fn size2(&self) -> Result<u32, BlockError> {
        self.option_uint(OptionKey::Size2)?
            .ok_or(BlockError::MissingOption { option: "Size2" })
    }

    pub fn etag(&self) -> Result<Etag, BlockError> {
        self.option(OptionKey::ETag)
            .map(Etag::new)
            .ok_or(BlockError::MissingOption { option: "ETag" })
    }

    pub fn observe(&self) -> Option<u32> {
        self.option_uint(OptionKey::Observe).ok().flatten()
    }

    pub fn max_age(&self) -> Option<u32> {
        self.option_uint(OptionKey::MaxAge).ok().flatten()
    }

    /// Set the request path from a slash separated string
    pub fn set_path(&mut self, path: &str) {
        self.remove_option(OptionKey::UriPath);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.add_option(OptionKey::UriPath, segment.as_bytes());
        }
    }

    pub fn path(&self) -> String {
        self.option_values(OptionKey::UriPath)
            .map(String::from_utf8_lossy)
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn add_query(&mut self, query: &str) {
        self.add_option(OptionKey::UriQuery, query.as_bytes());
    }

    /// Canonical query string: the URI queries joined with `&`
    pub fn query_string(&self) -> String {
        self.option_values(OptionKey::UriQuery)
            .map(String::from_utf8_lossy)
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl fmt::Display for Pdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} mid={} token={} /{} ({} bytes)",
            self.message_type,
            self.code,
            self.message_id,
            self.token,
            self.path(),
            self.data.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Pdu {
        Pdu::new(
            MessageType::Confirmable,
            Code::GET,
            MessageId(10),
            Token::new(vec![1, 2]),
        )
    }

    #[test]
    fn response_codes_display_as_class_detail() {
        assert_eq!(Code::CONTENT.to_string(), "2.05");
        assert_eq!(Code::SERVICE_UNAVAILABLE.to_string(), "5.03");
        assert!(Code::GET.is_request());
        assert!(!Code::EMPTY.is_request());
    }

    #[test]
    fn options_stay_sorted_and_replace_singletons() {
        let mut pdu = request();
        pdu.set_path(".well-known/dots/mitigate/cuid=abc");
        pdu.set_option_uint(OptionKey::Observe, 0);
        pdu.set_option_uint(OptionKey::Block2, 0x16);
        pdu.set_option_uint(OptionKey::Block2, 0x26);

        let keys: Vec<OptionKey> = pdu.options().iter().map(|o| o.key).collect();
        assert_eq!(
            keys,
            vec![
                OptionKey::Observe,
                OptionKey::UriPath,
                OptionKey::UriPath,
                OptionKey::UriPath,
                OptionKey::UriPath,
                OptionKey::Block2,
            ]
        );
        assert_eq!(pdu.path(), ".well-known/dots/mitigate/cuid=abc");
        assert_eq!(pdu.block2().unwrap().num, 2);
        assert_eq!(pdu.observe(), Some(0));
    }

    #[test]
    fn missing_block_options_are_reported() {
        let pdu = request();
        assert!(matches!(
            pdu.block2(),
            Err(BlockError::MissingOption { option: "Block2" })
        ));
        assert!(pdu.size2().is_err());
        assert!(pdu.etag().is_err());
    }

    #[test]
    fn oversized_integer_option_is_rejected() {
        let mut pdu = request();
        pdu.add_option(OptionKey::Size2, vec![1, 2, 3, 4, 5]);
        assert!(matches!(
            pdu.size2(),
            Err(BlockError::OptionTooLong { length: 5, .. })
        ));
    }
}
