//! PDU fixtures
//!
//! Canned requests and server responses for exercising the session manager.

use dots_client_core::{Block, Code, MessageId, MessageType, OptionKey, Pdu, Token};

/// Mitigation request path used by the fixtures
pub const MITIGATION_PATH: &str = ".well-known/dots/mitigate/cuid=dz6pHjaADkaFTbjr0JGBpw";

pub fn get_request(message_type: MessageType, message_id: u16, token: &[u8]) -> Pdu {
    let mut pdu = Pdu::new(message_type, Code::GET, MessageId(message_id), Token::new(token.to_vec()));
    pdu.set_path(MITIGATION_PATH);
    pdu
}

/// GET registering an observation, with a URI query
pub fn observe_request(message_id: u16, token: &[u8], query: &str) -> Pdu {
    let mut pdu = get_request(MessageType::Confirmable, message_id, token);
    pdu.set_option_uint(OptionKey::Observe, 0);
    pdu.add_query(query);
    pdu
}

/// Piggybacked or separate response echoing the request's id and token
pub fn response_to(request: &Pdu, code: Code, data: &[u8]) -> Pdu {
    let message_type = if request.is_confirmable() {
        MessageType::Acknowledgement
    } else {
        MessageType::NonConfirmable
    };
    Pdu::new(message_type, code, request.message_id, request.token.clone()).with_data(data.to_vec())
}

/// One block of a block-wise response to `request`
pub fn block_response(
    request: &Pdu,
    etag: &[u8],
    num: u32,
    more: bool,
    szx: u8,
    data: &[u8],
) -> Pdu {
    let mut pdu = response_to(request, Code::CONTENT, data);
    pdu.add_option(OptionKey::ETag, etag.to_vec());
    if let Ok(block) = Block::new(num, more, szx) {
        pdu.set_block2(block);
    }
    pdu.set_option_uint(OptionKey::Size2, 4096);
    pdu
}

/// Server notification on an observed token
pub fn notification(token: &[u8], sequence: u32, data: &[u8]) -> Pdu {
    let mut pdu = Pdu::new(
        MessageType::NonConfirmable,
        Code::CONTENT,
        MessageId(0x7000 + sequence as u16),
        Token::new(token.to_vec()),
    )
    .with_data(data.to_vec());
    pdu.set_option_uint(OptionKey::Observe, sequence);
    pdu
}

/// Session configuration response carrying a Max-Age
pub fn session_config_response(request: &Pdu, max_age_secs: u32) -> Pdu {
    let mut pdu = response_to(request, Code::CONTENT, br#"{"ietf-dots-signal-channel:signal-config":{}}"#);
    pdu.set_option_uint(OptionKey::MaxAge, max_age_secs);
    pdu
}
