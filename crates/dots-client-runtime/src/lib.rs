//! DOTS Signal Client Runtime
//!
//! This crate contains the session manager of the DOTS signal channel client:
//! - `Environment`: single owner of the session, in-flight requests,
//!   reassembly buffers and observation registry
//! - Timed tasks: message retransmission, heartbeat, ping and session
//!   configuration refresh, all reporting through one event queue
//! - Block-wise response reassembly and session replacement
//! - `SignalDriver`: the outer loop interleaving transport I/O with event
//!   processing
//!
//! The wire protocol, datagram security and PDU codec live behind the
//! `SignalSession` and `SignalContext` traits of `dots-client-core`.

pub mod blockwise;
pub mod driver;
pub mod environment;
pub mod events;
pub mod observation;
pub mod task;
pub mod tasks;

pub use blockwise::{BlockAssembler, BlockCheck, BlockKey};
pub use driver::SignalDriver;
pub use environment::Environment;
pub use events::{ClientEvent, ClientEventReceiver, ClientEventSender};
pub use observation::{MitigationChange, ObservationRegistry, RequestQuery};
pub use task::{Event, EventKind, EventReceiver, EventSender, Task, TaskId, TaskRef};
pub use tasks::{
    HeartBeatTask, MessageOrigin, MessageTask, PendingResponse, PingTask, ResponseOutcome,
    RetryParams, SessionConfigTask,
};

// Re-export core types for convenience
pub use dots_client_core::{
    Block, ClientConfig, DotsError, DotsResult, MessageKey, Pdu, SignalContext, SignalSession,
    Token, TransportEvent,
};
