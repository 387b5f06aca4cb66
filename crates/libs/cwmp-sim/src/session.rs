//! The CWMP session state machine for one simulated device.
//!
//! A session runs `Inform`, then every queued CPE request, then an empty POST
//! that hands control to the ACS. ACS requests are answered one by one until
//! the ACS replies with an empty body. Between sessions the engine idles until
//! the periodic inform interval elapses or a connection request arrives.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::clock::new_request_id;
use crate::error::SessionError;
use crate::net::Connector;
use crate::pending::{PendingOperation, PendingQueue};
use crate::rpc::{dispatch, MethodContext};
use crate::signal::ConnectionRequestSignal;
use crate::soap::{
    render_inform, Envelope, InboundEnvelope, EVENT_CONNECTION_REQUEST, EVENT_PERIODIC,
};
use crate::store::ParameterStore;
use crate::transport::AcsTransport;

const PERIODIC_INFORM_INTERVAL: &str = "ManagementServer.PeriodicInformInterval";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Informing,
    DrainingPending,
    AwaitingAcsRequest,
    ProcessingAcsMethod,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Informing => "informing",
            Self::DrainingPending => "draining-pending",
            Self::AwaitingAcsRequest => "awaiting-acs-request",
            Self::ProcessingAcsMethod => "processing-acs-method",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on each HTTP exchange with the ACS.
    pub request_timeout: Duration,
    /// Used when the data model has no usable periodic inform interval.
    pub default_inform_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            default_inform_interval: Duration::from_secs(10),
        }
    }
}

pub struct SessionEngine<T> {
    serial_number: String,
    store: ParameterStore,
    pending: PendingQueue,
    transport: T,
    connector: Connector,
    signal: Arc<ConnectionRequestSignal>,
    config: EngineConfig,
    state: watch::Sender<SessionState>,
}

impl<T: AcsTransport> SessionEngine<T> {
    pub fn new(
        serial_number: impl Into<String>,
        store: ParameterStore,
        transport: T,
        connector: Connector,
        signal: Arc<ConnectionRequestSignal>,
        config: EngineConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            serial_number: serial_number.into(),
            store,
            pending: PendingQueue::new(),
            transport,
            connector,
            signal,
            config,
            state,
        }
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::debug!("simulator {}: {} -> {}", self.serial_number, previous, state);
        }
    }

    /// Wait before the next periodic session, read from the data model each
    /// time so an ACS write takes effect on the following cycle.
    pub fn next_inform_delay(&self) -> Duration {
        self.store
            .root_value(PERIODIC_INFORM_INTERVAL)
            .and_then(|value| value.as_u64())
            .filter(|secs| *secs > 0)
            .map_or(self.config.default_inform_interval, Duration::from_secs)
    }

    /// Runs one full session and always leaves the engine in `Closed` with the
    /// connection dropped. `event` defaults to `2 PERIODIC`.
    pub async fn run_session(&mut self, event: Option<&str>) -> Result<(), SessionError> {
        log::info!(
            "simulator {}: session start, event {}",
            self.serial_number,
            event.unwrap_or(EVENT_PERIODIC)
        );
        let result = self.exchange_session(event).await;
        self.transport.end_session();
        self.set_state(SessionState::Closed);
        if result.is_ok() {
            log::info!("simulator {}: session closed", self.serial_number);
        }
        result
    }

    async fn exchange_session(&mut self, event: Option<&str>) -> Result<(), SessionError> {
        self.set_state(SessionState::Informing);
        let mut envelope = Envelope::new(new_request_id());
        render_inform(&self.store, &mut envelope, event);
        let reply = self.transport.exchange(Some(envelope.to_xml())).await?;
        let reply = reply.ok_or(SessionError::MissingBody("Inform"))?;
        let reply = InboundEnvelope::parse(&reply)?;
        if let Some((code, message)) = reply.fault() {
            return Err(SessionError::AcsFault { code, message });
        }
        if reply.method_name() != Some("InformResponse") {
            log::debug!(
                "simulator {}: unexpected reply to Inform: {:?}",
                self.serial_number,
                reply.method_name()
            );
        }

        self.set_state(SessionState::DrainingPending);
        while let Some(operation) = self.pending.dequeue() {
            if let Err(err) = self.send_pending(&operation).await {
                self.pending.requeue_front(operation);
                return Err(err);
            }
        }

        self.set_state(SessionState::AwaitingAcsRequest);
        let mut reply = self.transport.exchange(None).await?;
        while let Some(text) = reply {
            self.set_state(SessionState::ProcessingAcsMethod);
            let inbound = InboundEnvelope::parse(&text)?;
            let Some(method) = inbound.method else {
                log::debug!(
                    "simulator {}: ACS sent an empty Body, closing session",
                    self.serial_number
                );
                break;
            };
            let mut response = Envelope::new(inbound.id.unwrap_or_else(new_request_id));
            let mut ctx = MethodContext {
                store: &mut self.store,
                pending: &mut self.pending,
                connector: &self.connector,
            };
            dispatch(&mut ctx, &method, &mut response);

            self.set_state(SessionState::AwaitingAcsRequest);
            reply = self.transport.exchange(Some(response.to_xml())).await?;
        }
        Ok(())
    }

    async fn send_pending(&mut self, operation: &PendingOperation) -> Result<(), SessionError> {
        let mut envelope = Envelope::new(new_request_id());
        operation.render(&mut envelope);
        let reply = self.transport.exchange(Some(envelope.to_xml())).await?;
        let reply = reply.ok_or(SessionError::MissingBody(operation.method_name()))?;
        let reply = InboundEnvelope::parse(&reply)?;
        if let Some((code, message)) = reply.fault() {
            log::warn!(
                "simulator {}: ACS rejected {} with fault {}: {}",
                self.serial_number,
                operation.method_name(),
                code,
                message
            );
        }
        Ok(())
    }

    /// Drives sessions until `cancel` fires. The first session starts at once.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut event: Option<&'static str> = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.run_session(event) => {
                    if let Err(err) = result {
                        log::warn!("simulator {}: session failed: {}", self.serial_number, err);
                    }
                }
            }
            self.set_state(SessionState::Idle);

            let deadline = Instant::now() + self.next_inform_delay();
            event = loop {
                if self.signal.take() {
                    break Some(EVENT_CONNECTION_REQUEST);
                }
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.set_state(SessionState::Closed);
                        return;
                    }
                    _ = sleep_until(deadline) => break None,
                    _ = self.signal.notified() => {}
                }
            };
        }
        self.transport.end_session();
        self.set_state(SessionState::Closed);
    }
}
