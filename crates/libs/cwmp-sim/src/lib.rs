//! CWMP (TR-069) customer-premises device simulator.
//!
//! One [`SessionEngine`] drives one simulated device: it opens sessions with an
//! `Inform`, drains the device's own queued RPCs, answers the ACS, and sleeps
//! until the periodic timer fires or a connection request arrives.

pub mod clock;
pub mod download;
pub mod error;
pub mod http;
pub mod listener;
pub mod net;
pub mod pending;
pub mod rpc;
pub mod session;
pub mod signal;
pub mod simulator;
pub mod soap;
pub mod store;
pub mod transport;
pub mod value;

pub use error::{CodecError, SessionError, SimulatorError};
pub use session::{EngineConfig, SessionEngine, SessionState};
pub use simulator::{start, start_with, Simulator, SimulatorOptions};
pub use store::{ParameterRecord, ParameterStore};
pub use value::ParamValue;
