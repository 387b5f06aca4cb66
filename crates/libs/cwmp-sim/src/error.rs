use std::time::Duration;

/// Errors produced while reading or building SOAP envelopes.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("xml syntax error: {0}")]
    Xml(String),

    #[error("document has no root element")]
    EmptyDocument,

    #[error("expected a SOAP Envelope, found <{0}>")]
    NotAnEnvelope(String),

    #[error("missing element: {0}")]
    MissingElement(String),

    #[error("body is not valid utf-8")]
    InvalidUtf8,
}

/// Failures that end the current session. The engine recovers from every one
/// of these by returning to `Idle` and waiting for the next scheduled inform.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no response from ACS within {0:?}")]
    Timeout(Duration),

    #[error("unexpected response code {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("ACS sent an empty body in reply to {0}")]
    MissingBody(&'static str),

    #[error("malformed envelope: {0}")]
    Codec(#[from] CodecError),

    #[error("connection closed before a complete response was read")]
    ConnectionClosed,

    #[error("ACS replied with fault {code}: {message}")]
    AcsFault { code: String, message: String },
}

/// Startup failures of [`crate::start`].
#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: &'static str },

    #[error("connection request listener: {0}")]
    Listener(std::io::Error),

    #[error("tls setup: {0}")]
    Tls(std::io::Error),

    #[error("invalid data model: {0}")]
    DataModel(String),
}
