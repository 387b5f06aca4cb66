//! HTTP POST exchange with the ACS.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use tokio::io::AsyncWriteExt;

use crate::error::{CodecError, SessionError};
use crate::http::{read_response, HttpResponse};
use crate::net::{BoxedStream, Connector, Endpoint};

/// One request/response leg of a CWMP session.
#[async_trait]
pub trait AcsTransport: Send {
    /// POSTs `body`, or an empty POST when `None`, and returns the ACS reply.
    /// An empty or whitespace-only reply is `None`.
    async fn exchange(&mut self, body: Option<String>) -> Result<Option<String>, SessionError>;

    /// Drops any kept-alive connection. Cookies survive.
    fn end_session(&mut self);
}

pub fn basic_authorization(username: &str, password: &str) -> String {
    format!("Basic {}", BASE64_STANDARD.encode(format!("{username}:{password}")))
}

/// Keep-alive HTTP client holding at most one connection to the ACS.
pub struct AcsClient {
    endpoint: Endpoint,
    connector: Connector,
    authorization: String,
    cookies: Vec<(String, String)>,
    stream: Option<BoxedStream>,
    timeout: Duration,
}

impl AcsClient {
    pub fn new(
        endpoint: Endpoint,
        connector: Connector,
        authorization: String,
        timeout: Duration,
    ) -> Self {
        Self { endpoint, connector, authorization, cookies: Vec::new(), stream: None, timeout }
    }

    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let pairs: Vec<String> =
            self.cookies.iter().map(|(name, value)| format!("{name}={value}")).collect();
        Some(pairs.join("; "))
    }

    fn build_request(&self, body: &str) -> Vec<u8> {
        let mut request = format!(
            "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: text/xml; charset=\"utf-8\"\r\nContent-Length: {}\r\nAuthorization: {}\r\nConnection: keep-alive\r\n",
            self.endpoint.path,
            self.endpoint.authority(),
            body.len(),
            self.authorization
        );
        if let Some(cookie) = self.cookie_header() {
            request.push_str("Cookie: ");
            request.push_str(&cookie);
            request.push_str("\r\n");
        }
        request.push_str("\r\n");
        request.push_str(body);
        request.into_bytes()
    }

    fn store_cookies(&mut self, response: &HttpResponse) {
        for header in response.header_values("set-cookie") {
            let pair = header.split(';').next().unwrap_or_default();
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let (name, value) = (name.trim().to_string(), value.trim().to_string());
            match self.cookies.iter_mut().find(|(existing, _)| *existing == name) {
                Some(slot) => slot.1 = value,
                None => self.cookies.push((name, value)),
            }
        }
    }

    async fn send_once(&mut self, request: &[u8]) -> io::Result<HttpResponse> {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.connector.connect(&self.endpoint).await?,
        };
        stream.write_all(request).await?;
        stream.flush().await?;
        let response = read_response(&mut stream).await?;
        if !response.closes_connection() {
            self.stream = Some(stream);
        }
        Ok(response)
    }

    async fn round_trip(&mut self, request: &[u8]) -> io::Result<HttpResponse> {
        let reused = self.stream.is_some();
        match self.send_once(request).await {
            Err(err) if reused && is_stale_connection(&err) => {
                log::debug!("kept-alive ACS connection went away ({err}), reconnecting");
                self.send_once(request).await
            }
            result => result,
        }
    }
}

fn is_stale_connection(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

#[async_trait]
impl AcsTransport for AcsClient {
    async fn exchange(&mut self, body: Option<String>) -> Result<Option<String>, SessionError> {
        let request = self.build_request(body.as_deref().unwrap_or_default());
        let response = match tokio::time::timeout(self.timeout, self.round_trip(&request)).await {
            Ok(result) => result?,
            Err(_) => {
                self.stream = None;
                return Err(SessionError::Timeout(self.timeout));
            }
        };

        if !response.is_success() {
            self.stream = None;
            return Err(SessionError::HttpStatus {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
        self.store_cookies(&response);

        let text = String::from_utf8(response.body).map_err(|_| CodecError::InvalidUtf8)?;
        if text.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(text))
        }
    }

    fn end_session(&mut self) {
        self.stream = None;
    }
}
