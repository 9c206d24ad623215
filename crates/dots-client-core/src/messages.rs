//! Keepalive and session configuration messages
//!
//! Builders for the PDUs the client emits on its own: heartbeats, pings and
//! the periodic session configuration request.

use serde::{Deserialize, Serialize};

use crate::errors::DotsResult;
use crate::pdu::{Code, MessageType, OptionKey, Pdu};
use crate::session::SignalSession;
use crate::types::Token;

pub const HEARTBEAT_PATH: &str = ".well-known/dots/hb";
pub const SESSION_CONFIG_PATH: &str = ".well-known/dots/config";

/// Content-Format value for `application/json`
pub const CONTENT_FORMAT_JSON: u32 = 50;

// ----------------------------------------------------------------------------
// Heartbeat Body
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartBeat {
    #[serde(rename = "peer-hb-status")]
    pub peer_hb_status: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartBeatRequest {
    #[serde(rename = "ietf-dots-signal-channel:heartbeat")]
    pub heartbeat: HeartBeat,
}

impl HeartBeatRequest {
    pub fn new(peer_hb_status: bool) -> Self {
        Self {
            heartbeat: HeartBeat { peer_hb_status },
        }
    }
}

// ----------------------------------------------------------------------------
// Builders
// ----------------------------------------------------------------------------

/// Non-confirmable heartbeat carrying `peer-hb-status: true`
pub fn heartbeat_message(session: &mut dyn SignalSession) -> DotsResult<Pdu> {
    let body = serde_json::to_vec(&HeartBeatRequest::new(true))?;
    let token = session.new_token();
    let mut pdu = Pdu::new(
        MessageType::NonConfirmable,
        Code::PUT,
        session.new_message_id(),
        token,
    )
    .with_data(body);
    pdu.set_path(HEARTBEAT_PATH);
    pdu.set_option_uint(OptionKey::ContentFormat, CONTENT_FORMAT_JSON);
    Ok(pdu)
}

/// Empty confirmable message; the server answers with a reset
pub fn ping_message(session: &mut dyn SignalSession) -> Pdu {
    Pdu::new(
        MessageType::Confirmable,
        Code::EMPTY,
        session.new_message_id(),
        Token::empty(),
    )
}

/// Request template for the signal session configuration
pub fn session_config_request(session: &mut dyn SignalSession) -> Pdu {
    let token = session.new_token();
    let mut pdu = Pdu::new(
        MessageType::NonConfirmable,
        Code::GET,
        session.new_message_id(),
        token,
    );
    pdu.set_path(SESSION_CONFIG_PATH);
    pdu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_body_uses_yang_names() {
        let body = serde_json::to_string(&HeartBeatRequest::new(true)).unwrap();
        assert_eq!(
            body,
            r#"{"ietf-dots-signal-channel:heartbeat":{"peer-hb-status":true}}"#
        );
    }
}
