use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SimulatorError;
use crate::listener;
use crate::net::{Connector, Endpoint};
use crate::session::{EngineConfig, SessionEngine, SessionState};
use crate::signal::ConnectionRequestSignal;
use crate::store::{ParameterStore, ROOT_OBJECTS};
use crate::transport::{basic_authorization, AcsClient};
use crate::value::ParamValue;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimulatorOptions {
    pub engine: EngineConfig,
    /// PEM bundle trusted for HTTPS instead of the built-in web PKI roots.
    pub ca_file: Option<PathBuf>,
}

/// Handle to one running simulated device.
pub struct Simulator {
    serial_number: String,
    connection_request_url: String,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Simulator {
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn connection_request_url(&self) -> &str {
        &self.connection_request_url
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Stops the engine and the connection-request listener.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            log::warn!("simulator {}: engine task ended abnormally: {}", self.serial_number, err);
        }
    }
}

/// Starts a device with default options. See [`start_with`].
pub async fn start(
    store: ParameterStore,
    serial_number: &str,
    acs_url: &str,
) -> Result<Simulator, SimulatorError> {
    start_with(store, serial_number, acs_url, SimulatorOptions::default()).await
}

/// Seeds the serial number, binds the connection-request listener, publishes
/// its URL into the data model and spawns the session engine, whose first
/// session starts immediately.
pub async fn start_with(
    mut store: ParameterStore,
    serial_number: &str,
    acs_url: &str,
    options: SimulatorOptions,
) -> Result<Simulator, SimulatorError> {
    let endpoint = Endpoint::parse(acs_url)?;

    if let Some(path) = store.resolve_root("DeviceInfo.SerialNumber") {
        store.set_value(&path, ParamValue::String(serial_number.to_string()));
    }
    let credential =
        |suffix: &str| store.root_value(suffix).map(ParamValue::to_wire).unwrap_or_default();
    let authorization = basic_authorization(
        &credential("ManagementServer.Username"),
        &credential("ManagementServer.Password"),
    );

    let connector = Connector::new(options.ca_file.as_deref())?;
    let signal = Arc::new(ConnectionRequestSignal::new());
    let cancel = CancellationToken::new();
    let listener =
        listener::bind(&endpoint, serial_number, signal.clone(), cancel.child_token()).await?;

    // InternetGatewayDevice. wins here when both roots carry the parameter.
    if let Some(path) = ROOT_OBJECTS
        .iter()
        .rev()
        .map(|root| format!("{root}ManagementServer.ConnectionRequestURL"))
        .find(|path| store.has(path))
    {
        store.set_value(&path, ParamValue::String(listener.url.clone()));
    }

    let timeout = options.engine.request_timeout;
    let transport = AcsClient::new(endpoint, connector.clone(), authorization, timeout);
    let engine =
        SessionEngine::new(serial_number, store, transport, connector, signal, options.engine);
    let state = engine.subscribe();
    log::info!("simulator {serial_number} starting against {acs_url}");
    let task = tokio::spawn(engine.run(cancel.clone()));

    Ok(Simulator {
        serial_number: serial_number.to_string(),
        connection_request_url: listener.url,
        state,
        cancel,
        task,
    })
}
