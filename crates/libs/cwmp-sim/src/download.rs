//! Background file fetch started by the `Download` RPC.
//!
//! The fetch is never joined. Its result is published on a watch channel and
//! read whenever the matching `TransferComplete` is rendered, so a report that
//! goes out before the fetch finishes carries the default timeout fault.

use std::io;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

use crate::http::{discard_body, read_response_head};
use crate::net::{Connector, Endpoint};

pub const FAULT_DOWNLOAD_FAILURE: &str = "9016";
pub const FAULT_DOWNLOAD_TIMEOUT: &str = "9010";

/// Upper bound on one fetch, connect through end of body.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferOutcome {
    pub fault_code: String,
    pub fault_string: String,
}

impl TransferOutcome {
    /// What a report says while no result has been observed.
    pub fn timed_out() -> Self {
        Self { fault_code: FAULT_DOWNLOAD_TIMEOUT.into(), fault_string: "Download timeout".into() }
    }

    pub fn success() -> Self {
        Self { fault_code: "0".into(), fault_string: String::new() }
    }

    pub fn is_success(&self) -> bool {
        self.fault_code == "0"
    }
}

pub fn spawn_download(connector: &Connector, url: &str) -> watch::Receiver<TransferOutcome> {
    let (tx, rx) = watch::channel(TransferOutcome::timed_out());
    let endpoint = match Endpoint::parse(url) {
        Ok(endpoint) => endpoint,
        Err(err) => {
            log::warn!("download not started: {err}");
            return rx;
        }
    };

    let connector = connector.clone();
    tokio::spawn(async move {
        let attempt = tokio::time::timeout(FETCH_TIMEOUT, fetch(&connector, &endpoint));
        let fetched = match attempt.await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("download did not finish within {}s", FETCH_TIMEOUT.as_secs()),
            )),
        };
        let outcome = match fetched {
            Ok(200) => TransferOutcome::success(),
            Ok(status) => TransferOutcome {
                fault_code: FAULT_DOWNLOAD_FAILURE.into(),
                fault_string: format!("Unexpected response {status}"),
            },
            Err(err) => TransferOutcome {
                fault_code: FAULT_DOWNLOAD_TIMEOUT.into(),
                fault_string: err.to_string(),
            },
        };
        log::debug!(
            "download {}:{}{} finished: {:?}",
            endpoint.host,
            endpoint.port,
            endpoint.path,
            outcome
        );
        tx.send_replace(outcome);
    });
    rx
}

async fn fetch(connector: &Connector, endpoint: &Endpoint) -> io::Result<u16> {
    let mut stream = connector.connect(endpoint).await?;
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        endpoint.path,
        endpoint.authority()
    );
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;
    let head = read_response_head(&mut stream).await?;
    let received = discard_body(&mut stream, &head).await?;
    log::trace!("download body of {received} bytes discarded");
    Ok(head.status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test(start_paused = true)]
    async fn stalled_file_server_times_out() {
        let server = TcpListener::bind("127.0.0.1:0").await.expect("bind file server");
        let addr = server.local_addr().expect("addr");
        tokio::spawn(async move {
            let (socket, _) = server.accept().await.expect("accept");
            std::future::pending::<()>().await;
            drop(socket);
        });

        let connector = Connector::new(None).expect("connector");
        let mut outcome = spawn_download(&connector, &format!("http://{addr}/stall"));
        outcome.changed().await.expect("fetch task publishes");
        let result = outcome.borrow().clone();
        assert_eq!(result.fault_code, FAULT_DOWNLOAD_TIMEOUT);
        assert!(result.fault_string.contains("did not finish"), "{}", result.fault_string);
    }

    #[tokio::test]
    async fn large_body_is_drained_and_reported() {
        let server = TcpListener::bind("127.0.0.1:0").await.expect("bind file server");
        let addr = server.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = server.accept().await.expect("accept");
            let _ = crate::http::read_request(&mut socket).await;
            let size = 4 * crate::http::MAX_BODY_LEN;
            let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {size}\r\n\r\n");
            let _ = socket.write_all(head.as_bytes()).await;
            let block = vec![0_u8; 1024 * 1024];
            for _ in 0..size / block.len() {
                if socket.write_all(&block).await.is_err() {
                    return;
                }
            }
        });

        let connector = Connector::new(None).expect("connector");
        let mut outcome = spawn_download(&connector, &format!("http://{addr}/image.bin"));
        tokio::time::timeout(Duration::from_secs(30), outcome.changed())
            .await
            .expect("fetch finishes")
            .expect("fetch task publishes");
        assert_eq!(*outcome.borrow(), TransferOutcome::success());
    }
}
