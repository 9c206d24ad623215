//! The Environment: single owner of signal channel session state
//!
//! The environment owns the active session and context, every task it starts,
//! the in-flight request map, the reassembly buffers and the observation
//! registry. Tasks only push [`Event`]s onto the shared queue; all mutation
//! happens in [`Environment::dispatch`] and [`Environment::handle_transport_event`],
//! both called from one loop, so none of this state is locked.

use core::time::Duration;
use std::collections::HashMap;

use dots_client_core::messages::{heartbeat_message, ping_message, session_config_request};
use dots_client_core::{
    ClientConfig, Code, DotsError, DotsResult, MessageKey, NackReason, OptionKey, Pdu,
    SessionDefaults, SignalContext, SignalSession, Token, TransportEvent,
};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::blockwise::{BlockAssembler, BlockCheck};
use crate::events::{
    create_client_event_channel, ClientEvent, ClientEventReceiver, ClientEventSender,
};
use crate::observation::{MitigationChange, ObservationRegistry, RequestQuery};
use crate::task::{create_event_channel, Event, EventKind, EventReceiver, EventSender, Task, TaskId, TaskRef};
use crate::tasks::{
    HeartBeatTask, MessageOrigin, MessageTask, PendingResponse, PingTask, RetryParams,
    SessionConfigTask,
};

/// A session established during reconnect, waiting to take over
#[derive(Debug)]
struct Replacement {
    session: Box<dyn SignalSession>,
    context: Option<Box<dyn SignalContext>>,
}

// ----------------------------------------------------------------------------
// Environment
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct Environment {
    config: ClientConfig,
    context: Box<dyn SignalContext>,
    session: Box<dyn SignalSession>,

    event_tx: EventSender,
    event_rx: EventReceiver,
    client_tx: ClientEventSender,
    client_rx: Option<ClientEventReceiver>,

    /// In-flight message tasks by message key
    requests: HashMap<MessageKey, MessageTask>,

    current_missing_hb: u32,
    missing_hb_allowed: u32,

    heartbeat: Option<HeartBeatTask>,
    ping: Option<PingTask>,
    session_config: Option<SessionConfigTask>,

    observations: ObservationRegistry,
    blocks: BlockAssembler,

    replacing: Option<Replacement>,
    reconnect_reason: Option<String>,
}

impl Environment {
    pub fn new(
        config: ClientConfig,
        context: Box<dyn SignalContext>,
        mut session: Box<dyn SignalSession>,
    ) -> DotsResult<Self> {
        config.validate()?;

        let (event_tx, event_rx) = create_event_channel(config.channels.event_buffer_size);
        let (client_tx, client_rx) =
            create_client_event_channel(config.channels.client_event_buffer_size);
        session.set_retransmit_params(config.session.retransmit_params());

        Ok(Self {
            missing_hb_allowed: config.session.missing_hb_allowed,
            blocks: BlockAssembler::new(config.block.clone()),
            config,
            context,
            session,
            event_tx,
            event_rx,
            client_tx,
            client_rx: Some(client_rx),
            requests: HashMap::new(),
            current_missing_hb: 0,
            heartbeat: None,
            ping: None,
            session_config: None,
            observations: ObservationRegistry::new(),
            replacing: None,
            reconnect_reason: None,
        })
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &dyn SignalSession {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> &mut dyn SignalSession {
        self.session.as_mut()
    }

    pub fn context_mut(&mut self) -> &mut dyn SignalContext {
        self.context.as_mut()
    }

    /// Sender side of the task event queue
    pub fn event_queue(&self) -> EventSender {
        self.event_tx.clone()
    }

    /// Take the client event receiver; available once
    pub fn client_events(&mut self) -> Option<ClientEventReceiver> {
        self.client_rx.take()
    }

    // ------------------------------------------------------------------------
    // Task Registration
    // ------------------------------------------------------------------------

    /// Register a task and start its loop
    ///
    /// A message task whose key is already in flight is rejected. Starting a
    /// periodic task replaces the running one of the same kind; a ping with a
    /// zero interval is not started at all.
    pub fn run(&mut self, task: Task) -> DotsResult<()> {
        match task {
            Task::Message(mut task) => {
                let key = task.key().clone();
                if self.requests.contains_key(&key) {
                    return Err(DotsError::DuplicateInFlight { key });
                }
                task.start(self.event_tx.clone());
                self.requests.insert(key, task);
            }
            Task::HeartBeat(mut task) => {
                if !task.is_runnable() {
                    debug!("Heartbeat interval is zero, not starting heartbeats");
                    return Ok(());
                }
                if let Some(previous) = self.heartbeat.take() {
                    previous.stop();
                }
                info!("Starting heartbeat every {:?}", task.interval());
                task.start(self.event_tx.clone());
                self.heartbeat = Some(task);
            }
            Task::Ping(mut task) => {
                if !task.is_runnable() {
                    debug!("Ping interval is zero, not starting pings");
                    return Ok(());
                }
                if let Some(previous) = self.ping.take() {
                    previous.stop();
                }
                info!("Starting ping every {:?}", task.interval());
                task.start(self.event_tx.clone());
                self.ping = Some(task);
            }
            Task::SessionConfig(mut task) => {
                if let Some(previous) = self.session_config.take() {
                    previous.stop();
                }
                task.start(self.event_tx.clone());
                self.session_config = Some(task);
            }
        }
        Ok(())
    }

    /// Send a request and return its response promise
    ///
    /// Retry parameters follow the delivery class of the PDU. A GET with
    /// Observe=0 registers an observation under its token; Observe=1 ends it.
    pub fn send_request(&mut self, pdu: Pdu) -> DotsResult<PendingResponse> {
        let params = if pdu.is_confirmable() {
            RetryParams::from(&self.config.confirmable)
        } else {
            RetryParams::from(&self.config.non_confirmable)
        };
        let observe = (pdu.code == Code::GET).then(|| pdu.observe()).flatten();
        let token = pdu.token.clone();
        let query = pdu.query_string();

        let (task, pending) = MessageTask::new(pdu, params, MessageOrigin::Request).with_response_slot();
        self.run(task.into())?;

        match observe {
            Some(0) => self.register_observation(token, query),
            Some(1) => {
                self.observations.remove(&token);
            }
            _ => {}
        }
        Ok(pending)
    }

    pub fn start_heartbeat(&mut self) -> DotsResult<()> {
        let task = HeartBeatTask::new(
            self.config.session.heartbeat_interval(),
            RetryParams::from(&self.config.non_confirmable),
        );
        self.run(task.into())
    }

    pub fn stop_heartbeat_task(&mut self) {
        if let Some(task) = &self.heartbeat {
            if !task.is_stopped() {
                info!("Stopping heartbeat");
                task.stop();
            }
        }
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat.as_ref().is_some_and(|t| !t.is_stopped())
    }

    pub fn start_ping(&mut self) -> DotsResult<()> {
        match self.config.ping_interval() {
            Some(interval) => self.run(PingTask::new(interval).into()),
            None => {
                debug!("Ping is disabled");
                Ok(())
            }
        }
    }

    /// Current refresh interval of the session configuration task
    pub fn session_config_interval(&self) -> Option<Duration> {
        self.session_config.as_ref().map(|t| t.interval())
    }

    pub fn start_session_config(&mut self, interval: Duration) -> DotsResult<()> {
        let template = session_config_request(self.session.as_mut());
        let task = SessionConfigTask::new(
            template,
            interval,
            RetryParams::from(&self.config.non_confirmable),
        );
        self.run(task.into())
    }

    /// Stop every task and forget in-flight requests
    pub fn stop_all(&mut self) {
        for (_, task) in self.requests.drain() {
            task.stop();
        }
        if let Some(task) = self.heartbeat.take() {
            task.stop();
        }
        if let Some(task) = self.ping.take() {
            task.stop();
        }
        if let Some(task) = self.session_config.take() {
            task.stop();
        }
    }

    // ------------------------------------------------------------------------
    // In-flight Requests
    // ------------------------------------------------------------------------

    pub fn is_in_flight(&self, key: &MessageKey) -> bool {
        self.requests.contains_key(key)
    }

    pub fn in_flight_keys(&self) -> Vec<MessageKey> {
        self.requests.keys().cloned().collect()
    }

    /// Stop and forget one in-flight request along with its partial blocks
    pub fn stop_request(&mut self, key: &MessageKey) -> bool {
        match self.requests.remove(key) {
            Some(task) => {
                task.stop();
                self.discard_blocks(&task);
                true
            }
            None => false,
        }
    }

    fn discard_blocks(&mut self, task: &MessageTask) {
        if task.origin() != MessageOrigin::Request {
            return;
        }
        let dropped = self.blocks.discard_token(&task.message().token);
        if dropped > 0 {
            debug!("Dropped {} partial responses of {}", dropped, task.key());
        }
    }

    // ------------------------------------------------------------------------
    // Heartbeat Accounting and Session Parameters
    // ------------------------------------------------------------------------

    pub fn set_missing_hb_allowed(&mut self, allowed: u32) {
        self.missing_hb_allowed = allowed;
    }

    pub fn missing_hb_allowed(&self) -> u32 {
        self.missing_hb_allowed
    }

    pub fn current_missing_hb(&self) -> u32 {
        self.current_missing_hb
    }

    pub fn reset_missing_hb(&mut self) {
        self.current_missing_hb = 0;
    }

    /// Update the transport retransmission parameters; invalid values leave
    /// the current ones in place
    pub fn set_retransmit_params(
        &mut self,
        max_retransmit: u32,
        ack_timeout_secs: f64,
        ack_random_factor: f64,
    ) -> DotsResult<()> {
        let session = SessionDefaults {
            max_retransmit,
            ack_timeout_secs,
            ack_random_factor,
            ..self.config.session.clone()
        };
        session.validate()?;

        self.session.set_retransmit_params(session.retransmit_params());
        self.config.session = session;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Observations and Block-wise Transfer
    // ------------------------------------------------------------------------

    pub fn register_observation(&mut self, token: Token, query: impl Into<String>) {
        self.observations.register(token, query);
    }

    /// Apply a notification's mitigation change; `None` once the query is gone
    pub fn update_observation_count(&mut self, token: &Token, change: MitigationChange) -> Option<u32> {
        self.observations.update_count(token, change)
    }

    pub fn set_observed_count(&mut self, token: &Token, count: u32) {
        self.observations.set_observed_count(token, count);
    }

    pub fn observation(&self, token: &Token) -> Option<&RequestQuery> {
        self.observations.get(token)
    }

    pub fn observations(&self) -> &ObservationRegistry {
        &self.observations
    }

    pub fn check_block(&mut self, pdu: &Pdu) -> BlockCheck {
        self.blocks.check_block(pdu)
    }

    pub fn pending_blocks(&self) -> usize {
        self.blocks.len()
    }

    // ------------------------------------------------------------------------
    // Session Replacement and Reconnect
    // ------------------------------------------------------------------------

    /// Record a newly established session to take over at the next check
    pub fn set_replacing_session(
        &mut self,
        session: Box<dyn SignalSession>,
        context: Option<Box<dyn SignalContext>>,
    ) {
        if let Some(mut stale) = self.replacing.take() {
            warn!(
                "Discarding pending replacement session {}",
                stale.session.describe()
            );
            stale.session.release();
        }
        info!("Session {} is pending replacement", session.describe());
        self.replacing = Some(Replacement { session, context });
    }

    pub fn has_replacing_session(&self) -> bool {
        self.replacing.is_some()
    }

    /// Swap in a pending replacement session; returns whether a swap happened
    pub fn check_session_replacement(&mut self) -> DotsResult<bool> {
        let Some(replacement) = self.replacing.take() else {
            return Ok(false);
        };

        info!(
            "Replacing session {} with {}",
            self.session.describe(),
            replacement.session.describe()
        );

        for (_, task) in self.requests.drain() {
            task.stop();
        }
        self.blocks.clear();
        self.observations.clear();

        let mut old = std::mem::replace(&mut self.session, replacement.session);
        old.release();
        if let Some(context) = replacement.context {
            self.context = context;
        }
        self.session
            .set_retransmit_params(self.config.session.retransmit_params());

        self.current_missing_hb = 0;
        self.reconnect_reason = None;

        if let Some(previous) = self.heartbeat.take() {
            previous.stop();
            let restarted = HeartBeatTask::new(previous.interval(), previous.params());
            self.run(restarted.into())?;
        }

        self.emit_client_event(ClientEvent::SessionReplaced);
        Ok(true)
    }

    /// Ask the driver to establish a new session
    pub fn request_reconnect(&mut self, reason: impl Into<String>) {
        if self.reconnect_reason.is_some() {
            return;
        }
        let reason = reason.into();
        info!("Requesting reconnect: {}", reason);
        self.emit_client_event(ClientEvent::ReconnectRequested {
            reason: reason.clone(),
        });
        self.reconnect_reason = Some(reason);
    }

    pub fn take_reconnect_request(&mut self) -> Option<String> {
        self.reconnect_reason.take()
    }

    // ------------------------------------------------------------------------
    // Event Dispatch
    // ------------------------------------------------------------------------

    /// Wait for the next task event
    pub async fn next_event(&mut self) -> Option<Event> {
        self.event_rx.recv().await
    }

    /// Dispatch every event already queued; returns how many were handled
    pub fn drain_events(&mut self) -> DotsResult<usize> {
        let mut handled = 0;
        while let Ok(event) = self.event_rx.try_recv() {
            self.dispatch(event)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Handle one task event
    pub fn dispatch(&mut self, event: Event) -> DotsResult<()> {
        match (event.task, event.kind) {
            (TaskRef::Message { id, key }, EventKind::Fire) => self.handle_message_fire(id, &key),
            (TaskRef::Message { id, key }, EventKind::Timeout) => {
                self.handle_message_timeout(id, &key);
                Ok(())
            }
            (TaskRef::HeartBeat { id }, _) => self.handle_heartbeat_fire(id),
            (TaskRef::Ping { id }, _) => self.handle_ping_fire(id),
            (TaskRef::SessionConfig { id }, _) => self.handle_session_config_fire(id),
        }
    }

    fn handle_message_fire(&mut self, id: TaskId, key: &MessageKey) -> DotsResult<()> {
        let task = match self.requests.get(key) {
            Some(task) if task.id() == id => task,
            _ => {
                debug!("Ignoring send event of finished task {}", key);
                return Ok(());
            }
        };

        if let Err(e) = self.session.send(task.message()) {
            error!("Failed to send message {}: {}", key, e);
            return Err(e.into());
        }
        debug!("Sent {}", task.message());
        Ok(())
    }

    fn handle_message_timeout(&mut self, id: TaskId, key: &MessageKey) {
        if !self.requests.get(key).is_some_and(|task| task.id() == id) {
            debug!("Ignoring timeout of finished task {}", key);
            return;
        }
        let Some(task) = self.requests.remove(key) else {
            return;
        };
        task.stop();
        self.discard_blocks(&task);

        match task.origin() {
            MessageOrigin::Request => warn!("Request {} timed out", key),
            MessageOrigin::SessionConfig => warn!("Session config request {} timed out", key),
            MessageOrigin::HeartBeat | MessageOrigin::Ping => {
                self.record_missing_heartbeat(key);
            }
        }
    }

    fn record_missing_heartbeat(&mut self, key: &MessageKey) {
        self.current_missing_hb += 1;
        warn!(
            "Keepalive {} missed ({}/{})",
            key, self.current_missing_hb, self.missing_hb_allowed
        );
        self.emit_client_event(ClientEvent::HeartBeatMissed {
            missing: self.current_missing_hb,
            allowed: self.missing_hb_allowed,
        });

        if self.current_missing_hb >= self.missing_hb_allowed {
            self.stop_heartbeat_task();
            self.request_reconnect(format!(
                "{} heartbeats missed",
                self.current_missing_hb
            ));
        }
    }

    fn handle_heartbeat_fire(&mut self, id: TaskId) -> DotsResult<()> {
        let (current, params) = match &self.heartbeat {
            Some(task) if task.id() == id && !task.is_stopped() => {
                (task.current().cloned(), task.params())
            }
            _ => {
                debug!("Ignoring firing of stopped heartbeat task {}", id);
                return Ok(());
            }
        };
        if current.is_some_and(|key| self.requests.contains_key(&key)) {
            debug!("Waiting for current heartbeat message to be completed");
            return Ok(());
        }

        let pdu = heartbeat_message(self.session.as_mut())?;
        let task = MessageTask::new(pdu, params, MessageOrigin::HeartBeat);
        let key = task.key().clone();
        self.run(task.into())?;
        debug!("Sent new heartbeat message {}", key);
        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.set_current(key);
        }
        Ok(())
    }

    fn handle_ping_fire(&mut self, id: TaskId) -> DotsResult<()> {
        let (current, params) = match &self.ping {
            Some(task) if task.id() == id => (task.current().cloned(), task.message_params()),
            _ => {
                debug!("Ignoring firing of stopped ping task {}", id);
                return Ok(());
            }
        };
        if current.is_some_and(|key| self.requests.contains_key(&key)) {
            debug!("Waiting for current ping to be completed");
            return Ok(());
        }

        let pdu = ping_message(self.session.as_mut());
        let task = MessageTask::new(pdu, params, MessageOrigin::Ping);
        let key = task.key().clone();
        self.run(task.into())?;
        if let Some(ping) = self.ping.as_mut() {
            ping.set_current(key);
        }
        Ok(())
    }

    fn handle_session_config_fire(&mut self, id: TaskId) -> DotsResult<()> {
        let (current, mut pdu, params) = match &self.session_config {
            Some(task) if task.id() == id => {
                (task.current().cloned(), task.template().clone(), task.params())
            }
            _ => {
                debug!("Ignoring firing of stopped session config task {}", id);
                return Ok(());
            }
        };
        if let Some(key) = current.filter(|key| self.requests.contains_key(key)) {
            debug!("Waiting for current session config message {} to be completed", key);
            return Ok(());
        }

        pdu.message_id = self.session.new_message_id();
        let task = MessageTask::new(pdu, params, MessageOrigin::SessionConfig);
        let key = task.key().clone();
        self.run(task.into())?;
        debug!("Sent new session config request {}", key);
        if let Some(session_config) = self.session_config.as_mut() {
            session_config.set_current(key);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Transport Events
    // ------------------------------------------------------------------------

    /// Drive the transport for one slice and handle what it reports
    pub async fn drive(&mut self, slice: Duration) -> DotsResult<()> {
        let events = self.context.drive(slice).await?;
        for event in events {
            if let Err(e) = self.handle_transport_event(event) {
                error!("Failed to handle transport event: {}", e);
            }
        }
        Ok(())
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) -> DotsResult<()> {
        match event {
            TransportEvent::Response(pdu) => self.handle_response(pdu),
            TransportEvent::Nack { sent, reason } => {
                self.handle_nack(&sent, reason);
                Ok(())
            }
            TransportEvent::SessionConnected(session) => {
                self.set_replacing_session(session, None);
                Ok(())
            }
            TransportEvent::SessionClosed { reason } => {
                self.request_reconnect(reason);
                Ok(())
            }
        }
    }

    /// Route an inbound response to its task, or to the observers
    pub fn handle_response(&mut self, pdu: Pdu) -> DotsResult<()> {
        let key = pdu.key();
        let Some(task) = self.requests.remove(&key) else {
            self.handle_unmatched(pdu);
            return Ok(());
        };
        task.stop();

        match task.origin() {
            MessageOrigin::Request => self.complete_request(task, pdu),
            MessageOrigin::HeartBeat => {
                debug!("Heartbeat {} answered with {}", key, pdu.code);
                Ok(())
            }
            MessageOrigin::Ping => {
                debug!("Ping {} answered", key);
                Ok(())
            }
            MessageOrigin::SessionConfig => self.handle_session_config_response(pdu),
        }
    }

    fn handle_nack(&mut self, sent: &Pdu, reason: NackReason) {
        let key = sent.key();
        let Some((id, origin)) = self.requests.get(&key).map(|t| (t.id(), t.origin())) else {
            debug!("Nack ({}) for untracked message {}", reason, key);
            return;
        };

        if reason == NackReason::Reset && origin == MessageOrigin::Ping {
            debug!("Ping {} answered with reset", key);
            self.stop_request(&key);
            return;
        }

        warn!("Message {} was not acknowledged: {}", key, reason);
        self.handle_message_timeout(id, &key);
    }

    fn complete_request(&mut self, mut task: MessageTask, pdu: Pdu) -> DotsResult<()> {
        if !pdu.code.is_success() && self.observations.contains(&pdu.token) {
            debug!("Observe request {} refused with {}", task.key(), pdu.code);
            self.observations.remove(&pdu.token);
        }

        if pdu.has_block2() {
            let check = self.blocks.check_block(&pdu);
            if check.more_blocks {
                if let Some(block) = check.block {
                    let mut next = task.message().clone();
                    next.message_id = self.session.new_message_id();
                    next.remove_option(OptionKey::Observe);
                    next.set_block2(block);
                    debug!("Requesting block {} for {}", block, task.key());

                    let mut continuation = MessageTask::new(next, task.params(), MessageOrigin::Request);
                    continuation.set_response_slot(task.take_response_slot());
                    return self.run(continuation.into());
                }
            }
            if let Some(assembled) = check.assembled {
                Self::deliver(&mut task, assembled);
                return Ok(());
            }
        }

        Self::deliver(&mut task, pdu);
        Ok(())
    }

    fn deliver(task: &mut MessageTask, pdu: Pdu) {
        match task.take_response_slot() {
            Some(slot) => {
                if slot.send(pdu).is_err() {
                    debug!("Waiter for {} is gone", task.key());
                }
            }
            None => debug!("Response for {} has no waiter", task.key()),
        }
    }

    fn handle_unmatched(&mut self, pdu: Pdu) {
        if self.observations.contains(&pdu.token) {
            debug!("Notification for token {}", pdu.token);
            self.emit_client_event(ClientEvent::Notification {
                token: pdu.token.clone(),
                pdu,
            });
        } else {
            info!("Unexpected incoming PDU: {}", pdu);
        }
    }

    fn handle_session_config_response(&mut self, pdu: Pdu) -> DotsResult<()> {
        let max_age = pdu.max_age();
        self.emit_client_event(ClientEvent::SessionConfig(pdu));

        let lead = self.config.interval_before_max_age();
        let refresh = match max_age.map(|secs| Duration::from_secs(u64::from(secs))) {
            Some(max_age) if max_age > lead => max_age - lead,
            _ => return Ok(()),
        };

        let restart = match &self.session_config {
            Some(task) if task.interval() != refresh => {
                Some((task.template().clone(), task.params()))
            }
            _ => None,
        };
        if let Some((template, params)) = restart {
            info!("Refresh session config after {:?}", refresh);
            self.run(SessionConfigTask::new(template, refresh, params).into())?;
        }
        Ok(())
    }

    fn emit_client_event(&self, event: ClientEvent) {
        match self.client_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!("Client event queue is full, dropping {:?}", event);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Client event receiver is gone");
            }
        }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.stop_all();
    }
}
