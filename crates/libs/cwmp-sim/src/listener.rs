//! HTTP endpoint the ACS hits to ask for an immediate session.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::error::SimulatorError;
use crate::http::{build_empty_response, find_header_end, parse_request_line, read_request};
use crate::net::Endpoint;
use crate::signal::ConnectionRequestSignal;

const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionRequestListener {
    pub url: String,
    pub local_addr: SocketAddr,
}

/// Local address the host uses to reach the ACS. A throwaway TCP connection is
/// opened and closed to find out.
pub async fn discover_local_addr(acs: &Endpoint) -> io::Result<SocketAddr> {
    let probe = TcpStream::connect((acs.host.as_str(), acs.port)).await?;
    let local = probe.local_addr()?;
    drop(probe);
    Ok(local)
}

/// Binds on the interface facing the ACS, one port above the probe's
/// ephemeral port, and serves until `cancel` fires. Each request is answered
/// with an empty 200 and raises `signal`.
pub async fn bind(
    acs: &Endpoint,
    serial_number: &str,
    signal: Arc<ConnectionRequestSignal>,
    cancel: CancellationToken,
) -> Result<ConnectionRequestListener, SimulatorError> {
    let probe = discover_local_addr(acs).await.map_err(SimulatorError::Listener)?;
    let port = probe.port().checked_add(1).unwrap_or(0);
    let listener = match TcpListener::bind(SocketAddr::new(probe.ip(), port)).await {
        Ok(listener) => listener,
        Err(err) => {
            log::warn!(
                "simulator {serial_number}: port {port} unavailable ({err}), using an ephemeral port"
            );
            TcpListener::bind(SocketAddr::new(probe.ip(), 0))
                .await
                .map_err(SimulatorError::Listener)?
        }
    };
    let local_addr = listener.local_addr().map_err(SimulatorError::Listener)?;
    let url = format!("http://{local_addr}/");
    log::info!("simulator {serial_number} listening for connection requests on {url}");

    let serial_number = serial_number.to_string();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let signal = signal.clone();
                        let serial_number = serial_number.clone();
                        tokio::spawn(async move {
                            let handled = handle_connection(stream, &serial_number, &signal).await;
                            if let Err(err) = handled {
                                log::debug!("connection request from {peer} failed: {err}");
                            }
                        });
                    }
                    Err(err) => log::warn!("simulator {serial_number}: accept failed: {err}"),
                },
            }
        }
        log::debug!("simulator {serial_number}: connection request listener stopped");
    });

    Ok(ConnectionRequestListener { url, local_addr })
}

async fn handle_connection(
    mut stream: TcpStream,
    serial_number: &str,
    signal: &ConnectionRequestSignal,
) -> io::Result<()> {
    let request = tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request(&mut stream))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "request head not received"))??;
    let head = find_header_end(&request).map_or(request.as_slice(), |end| &request[..end]);
    if parse_request_line(head).is_none() {
        return Ok(());
    }

    stream.write_all(&build_empty_response()).await?;
    stream.shutdown().await?;
    log::info!("simulator {serial_number} got connection request");
    signal.raise();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::read_response;

    #[tokio::test]
    async fn request_is_answered_and_raises_signal() {
        let acs = TcpListener::bind("127.0.0.1:0").await.expect("bind acs");
        let acs_addr = acs.local_addr().expect("acs addr");
        let endpoint = Endpoint::parse(&format!("http://{acs_addr}/")).expect("endpoint");
        let signal = Arc::new(ConnectionRequestSignal::new());
        let cancel = CancellationToken::new();

        let listener =
            bind(&endpoint, "SIM-1", signal.clone(), cancel.clone()).await.expect("listener");
        assert_eq!(listener.local_addr.ip(), acs_addr.ip());
        assert_eq!(listener.url, format!("http://{}/", listener.local_addr));

        let mut client = TcpStream::connect(listener.local_addr).await.expect("connect");
        client.write_all(b"GET / HTTP/1.1\r\nHost: cpe\r\n\r\n").await.expect("write");
        let response = read_response(&mut client).await.expect("response");
        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());

        tokio::time::timeout(Duration::from_secs(1), async {
            while !signal.is_raised() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("signal raised");
        cancel.cancel();
    }

    #[tokio::test]
    async fn unreachable_acs_fails_to_bind() {
        let acs = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = acs.local_addr().expect("addr");
        drop(acs);
        let endpoint = Endpoint::parse(&format!("http://{addr}/")).expect("endpoint");
        let signal = Arc::new(ConnectionRequestSignal::new());
        let result = bind(&endpoint, "SIM-2", signal, CancellationToken::new()).await;
        assert!(matches!(result, Err(SimulatorError::Listener(_))));
    }
}
