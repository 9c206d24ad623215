//! Outer driver loop
//!
//! Interleaves transport I/O with internal event processing: each iteration
//! drives the transport for one poll slice, swaps in a pending replacement
//! session, services reconnect requests and drains the task event queue.
//! Everything runs on the caller's task, so the environment keeps a single
//! writer.

use core::time::Duration;

use dots_client_core::{DotsError, DotsResult, SessionError};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::environment::Environment;

#[derive(Debug)]
pub struct SignalDriver {
    env: Environment,
    poll_slice: Duration,
}

impl SignalDriver {
    pub fn new(env: Environment) -> Self {
        let poll_slice = env.config().driver.poll_slice();
        Self { env, poll_slice }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn environment_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    pub fn into_environment(self) -> Environment {
        self.env
    }

    /// One iteration of the outer loop; returns the number of task events handled
    ///
    /// Only fatal errors are returned: a failed reconnect or a configuration
    /// problem. Everything else is logged and the loop carries on.
    pub async fn run_once(&mut self) -> DotsResult<usize> {
        if let Err(e) = self.env.drive(self.poll_slice).await {
            self.absorb(e)?;
        }

        if let Err(e) = self.env.check_session_replacement() {
            self.absorb(e)?;
        }

        if let Some(reason) = self.env.take_reconnect_request() {
            self.reconnect(&reason).await?;
        }

        match self.env.drain_events() {
            Ok(handled) => Ok(handled),
            Err(e) => {
                self.absorb(e)?;
                Ok(0)
            }
        }
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped, then stop every task
    pub async fn run_until(&mut self, mut shutdown: watch::Receiver<bool>) -> DotsResult<()> {
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                result = self.run_once() => {
                    result?;
                }
            }
        }

        info!("Signal driver shutting down");
        self.env.stop_all();
        Ok(())
    }

    async fn reconnect(&mut self, reason: &str) -> DotsResult<()> {
        info!("Establishing a new session ({})", reason);
        match self.env.context_mut().reconnect().await {
            Ok(session) => {
                self.env.set_replacing_session(session, None);
                Ok(())
            }
            Err(e) => {
                error!("Failed to establish a new session: {}", e);
                Err(e.into())
            }
        }
    }

    /// Log a recoverable error, or hand back a fatal one
    fn absorb(&mut self, e: DotsError) -> DotsResult<()> {
        if e.is_fatal() {
            error!("Unrecoverable error, stopping driver: {}", e);
            return Err(e);
        }
        match &e {
            DotsError::Session(SessionError::PollFailed { .. }) => {
                warn!("Transport poll failed: {}", e);
                self.env.request_reconnect(e.to_string());
            }
            _ => error!("Error in signal driver: {}", e),
        }
        Ok(())
    }
}
