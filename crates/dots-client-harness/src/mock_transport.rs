//! Mock Transport for Testing
//!
//! Deterministic stand-ins for the transport collaborator. A [`MockSession`]
//! records every PDU handed to it; a [`MockContext`] returns scripted
//! transport events from `drive` and scripted sessions from `reconnect`.
//! Both share their state with the test through cheap clones.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dots_client_core::{
    MessageId, Pdu, RetransmitParams, SessionError, SignalContext, SignalSession, Token,
    TransportEvent,
};
use tokio::time::Duration;
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Mock Session
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SessionState {
    sent: Vec<Pdu>,
    release_count: u32,
    retransmit_params: Option<RetransmitParams>,
    fail_sends: bool,
}

/// Session double recording sends, releases and retransmission parameters
#[derive(Debug, Clone)]
pub struct MockSession {
    name: String,
    state: Arc<Mutex<SessionState>>,
    next_message_id: Arc<AtomicU16>,
    next_token: Arc<AtomicU64>,
}

impl MockSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(SessionState::default())),
            next_message_id: Arc::new(AtomicU16::new(1)),
            next_token: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Shared view of this session's state for assertions
    pub fn probe(&self) -> MockSessionProbe {
        MockSessionProbe {
            state: Arc::clone(&self.state),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SignalSession for MockSession {
    fn send(&mut self, pdu: &Pdu) -> Result<(), SessionError> {
        let mut state = lock(&self.state);
        if state.release_count > 0 {
            return Err(SessionError::Released {
                session: self.name.clone(),
            });
        }
        if state.fail_sends {
            return Err(SessionError::SendFailed {
                session: self.name.clone(),
                reason: "scripted failure".to_string(),
            });
        }
        debug!("{} sent {}", self.name, pdu);
        state.sent.push(pdu.clone());
        Ok(())
    }

    fn new_message_id(&mut self) -> MessageId {
        MessageId(self.next_message_id.fetch_add(1, Ordering::Relaxed))
    }

    fn new_token(&mut self) -> Token {
        Token::new(self.next_token.fetch_add(1, Ordering::Relaxed).to_be_bytes().to_vec())
    }

    fn set_retransmit_params(&mut self, params: RetransmitParams) {
        lock(&self.state).retransmit_params = Some(params);
    }

    fn release(&mut self) {
        lock(&self.state).release_count += 1;
    }

    fn describe(&self) -> String {
        format!("mock:{}", self.name)
    }
}

/// Read side of a [`MockSession`]
#[derive(Debug, Clone)]
pub struct MockSessionProbe {
    state: Arc<Mutex<SessionState>>,
}

impl MockSessionProbe {
    pub fn sent(&self) -> Vec<Pdu> {
        lock(&self.state).sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        lock(&self.state).sent.len()
    }

    /// Sends matching a predicate, e.g. every heartbeat
    pub fn sent_matching(&self, predicate: impl Fn(&Pdu) -> bool) -> Vec<Pdu> {
        lock(&self.state)
            .sent
            .iter()
            .filter(|pdu| predicate(pdu))
            .cloned()
            .collect()
    }

    pub fn last_sent(&self) -> Option<Pdu> {
        lock(&self.state).sent.last().cloned()
    }

    pub fn clear_sent(&self) {
        lock(&self.state).sent.clear();
    }

    pub fn release_count(&self) -> u32 {
        lock(&self.state).release_count
    }

    pub fn retransmit_params(&self) -> Option<RetransmitParams> {
        lock(&self.state).retransmit_params
    }

    pub fn set_fail_sends(&self, fail: bool) {
        lock(&self.state).fail_sends = fail;
    }
}

// ----------------------------------------------------------------------------
// Mock Context
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ContextState {
    scripted: VecDeque<TransportEvent>,
    reconnects: VecDeque<Result<MockSession, String>>,
    poll_error: Option<String>,
    drive_calls: u64,
    reconnect_attempts: u32,
}

/// Context double: `drive` sleeps for the slice and returns scripted events
#[derive(Debug, Clone, Default)]
pub struct MockContext {
    state: Arc<Mutex<ContextState>>,
}

impl MockContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for the next `drive`
    pub fn push_event(&self, event: TransportEvent) {
        lock(&self.state).scripted.push_back(event);
    }

    pub fn push_response(&self, pdu: Pdu) {
        self.push_event(TransportEvent::Response(pdu));
    }

    /// Script the session returned by the next `reconnect`
    pub fn push_reconnect(&self, session: MockSession) {
        lock(&self.state).reconnects.push_back(Ok(session));
    }

    pub fn fail_next_reconnect(&self, reason: impl Into<String>) {
        lock(&self.state).reconnects.push_back(Err(reason.into()));
    }

    pub fn fail_next_poll(&self, reason: impl Into<String>) {
        lock(&self.state).poll_error = Some(reason.into());
    }

    pub fn drive_calls(&self) -> u64 {
        lock(&self.state).drive_calls
    }

    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.state).reconnect_attempts
    }
}

#[async_trait::async_trait]
impl SignalContext for MockContext {
    async fn drive(&mut self, slice: Duration) -> Result<Vec<TransportEvent>, SessionError> {
        tokio::time::sleep(slice).await;

        let mut state = lock(&self.state);
        state.drive_calls += 1;
        if let Some(reason) = state.poll_error.take() {
            return Err(SessionError::PollFailed { reason });
        }
        Ok(state.scripted.drain(..).collect())
    }

    async fn reconnect(&mut self) -> Result<Box<dyn SignalSession>, SessionError> {
        let mut state = lock(&self.state);
        state.reconnect_attempts += 1;
        match state.reconnects.pop_front() {
            Some(Ok(session)) => Ok(Box::new(session)),
            Some(Err(reason)) => Err(SessionError::ConnectFailed { reason }),
            None => Err(SessionError::ConnectFailed {
                reason: "no session scripted".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dots_client_core::{Code, MessageType};

    #[test]
    fn session_records_sends_until_released() {
        let mut session = MockSession::new("a");
        let probe = session.probe();
        let pdu = Pdu::new(MessageType::Confirmable, Code::GET, session.new_message_id(), session.new_token());

        session.send(&pdu).unwrap();
        session.release();
        assert!(matches!(session.send(&pdu), Err(SessionError::Released { .. })));
        assert_eq!(probe.sent(), vec![pdu]);
        assert_eq!(probe.release_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn context_returns_scripted_events_once() {
        let mut context = MockContext::new();
        let handle = context.clone();
        handle.push_response(Pdu::new(
            MessageType::NonConfirmable,
            Code::CONTENT,
            MessageId(3),
            Token::new(vec![1]),
        ));

        assert_eq!(context.drive(Duration::from_millis(10)).await.unwrap().len(), 1);
        assert!(context.drive(Duration::from_millis(10)).await.unwrap().is_empty());
        assert_eq!(handle.drive_calls(), 2);
        assert!(matches!(
            context.reconnect().await,
            Err(SessionError::ConnectFailed { .. })
        ));
    }
}
