use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cwmp_sim::http::{find_header_end, header_value, parse_headers, read_request, read_response};
use cwmp_sim::soap::{InboundEnvelope, XmlElement, EVENT_CONNECTION_REQUEST, EVENT_PERIODIC};
use cwmp_sim::{start, ParameterStore, SessionState, Simulator};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

const DATA_MODEL: &str = r#"{
    "Device.": [false],
    "Device.DeviceInfo.": [false],
    "Device.DeviceInfo.Manufacturer": [false, "Acme", "xsd:string"],
    "Device.DeviceInfo.ManufacturerOUI": [false, "001122", "xsd:string"],
    "Device.DeviceInfo.ProductClass": [false, "SimBox", "xsd:string"],
    "Device.DeviceInfo.SerialNumber": [false, "", "xsd:string"],
    "Device.DeviceInfo.SoftwareVersion": [false, "1.0.0", "xsd:string"],
    "Device.ManagementServer.": [false],
    "Device.ManagementServer.ConnectionRequestURL": [false, "", "xsd:string"],
    "Device.ManagementServer.ParameterKey": [false, "", "xsd:string"],
    "Device.ManagementServer.PeriodicInformInterval": [true, "300", "xsd:unsignedInt"],
    "Device.ManagementServer.Username": [false, "cpe", "xsd:string"],
    "Device.ManagementServer.Password": [false, "secret", "xsd:string"]
}"#;

#[derive(Clone, Debug)]
struct Seen {
    method: Option<String>,
    body: String,
    authorization: Option<String>,
}

#[derive(Default)]
struct AcsScript {
    requests: VecDeque<String>,
    seen: Vec<Seen>,
    /// Raw HTTP reply sent instead of an InformResponse.
    inform_failure: Option<String>,
}

type Shared = Arc<Mutex<AcsScript>>;

fn envelope(id: &str, body: &str) -> String {
    format!(
        concat!(
            r#"<soap-env:Envelope xmlns:soap-enc="http://schemas.xmlsoap.org/soap/encoding/" "#,
            r#"xmlns:soap-env="http://schemas.xmlsoap.org/soap/envelope/" xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
            r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:cwmp="urn:dslforum-org:cwmp-1-0">"#,
            r#"<soap-env:Header><cwmp:ID soap-env:mustUnderstand="1">{}</cwmp:ID></soap-env:Header>"#,
            r#"<soap-env:Body>{}</soap-env:Body></soap-env:Envelope>"#
        ),
        id, body
    )
}

async fn spawn_acs(script: Shared) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind acs");
    let addr = listener.local_addr().expect("acs addr");
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_acs_connection(socket, script.clone()));
        }
    });
    format!("http://{addr}/acs")
}

async fn serve_acs_connection(mut socket: TcpStream, script: Shared) {
    loop {
        let Ok(request) = read_request(&mut socket).await else {
            return;
        };
        let Some(end) = find_header_end(&request) else {
            return;
        };
        let headers = parse_headers(&request[..end]);
        let body = String::from_utf8_lossy(&request[end + 4..]).into_owned();
        let method = InboundEnvelope::parse(&body)
            .ok()
            .and_then(|parsed| parsed.method_name().map(str::to_string));

        let response = {
            let mut script = script.lock().expect("script");
            script.seen.push(Seen {
                method: method.clone(),
                body,
                authorization: header_value(&headers, "authorization").map(str::to_string),
            });
            match method.as_deref() {
                Some("Inform") => match script.inform_failure.clone() {
                    Some(reply) => reply,
                    None => xml_response(&envelope(
                        "inform-1",
                        "<cwmp:InformResponse><MaxEnvelopes>1</MaxEnvelopes></cwmp:InformResponse>",
                    )),
                },
                Some("TransferComplete") => {
                    xml_response(&envelope("tc-1", "<cwmp:TransferCompleteResponse/>"))
                }
                _ => script.requests.pop_front().map_or_else(
                    || "HTTP/1.1 204 No Content\r\n\r\n".to_string(),
                    |xml| xml_response(&xml),
                ),
            }
        };
        if socket.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn xml_response(xml: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/xml; charset=\"utf-8\"\r\nContent-Length: {}\r\n\r\n{}",
        xml.len(),
        xml
    )
}

async fn spawn_file_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind file server");
    let addr = listener.local_addr().expect("file server addr");
    let served = Arc::new(AtomicUsize::new(0));
    let counter = served.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = read_request(&mut socket).await;
            let reply: &[u8] =
                b"HTTP/1.1 200 OK\r\nContent-Length: 8\r\nConnection: close\r\n\r\nfirmware";
            let _ = socket.write_all(reply).await;
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    (format!("http://{addr}/fw.bin"), served)
}

async fn wait_until(script: &Shared, what: &str, done: impl Fn(&[Seen]) -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if done(&script.lock().expect("script").seen) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

async fn wait_idle(simulator: &Simulator) {
    let mut state = simulator.subscribe();
    let idle = state.wait_for(|state| *state == SessionState::Idle);
    tokio::time::timeout(Duration::from_secs(10), idle)
        .await
        .expect("engine idles")
        .expect("engine alive");
}

async fn send_connection_request(url: &str) {
    let authority = url.trim_start_matches("http://").trim_end_matches('/');
    let mut stream = TcpStream::connect(authority).await.expect("connect to cpe");
    stream
        .write_all(format!("GET / HTTP/1.1\r\nHost: {authority}\r\n\r\n").as_bytes())
        .await
        .expect("send connection request");
    let response = read_response(&mut stream).await.expect("connection request response");
    assert_eq!(response.status, 200);
}

fn body(seen: &Seen) -> XmlElement {
    InboundEnvelope::parse(&seen.body).expect("cpe envelope").method.expect("cpe body")
}

fn event_code(inform: &XmlElement) -> String {
    inform
        .child("Event")
        .and_then(|event| event.child("EventStruct"))
        .and_then(|event| event.child_text("EventCode"))
        .unwrap_or_default()
        .to_string()
}

fn count(seen: &[Seen], method: &str) -> usize {
    seen.iter().filter(|item| item.method.as_deref() == Some(method)).count()
}

#[tokio::test]
async fn download_is_reported_in_the_session_after_a_connection_request() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (file_url, served) = spawn_file_server().await;
    let script: Shared = Arc::default();
    {
        let mut script = script.lock().expect("script");
        script.requests.push_back(envelope(
            "gpv-1",
            r#"<cwmp:GetParameterValues><ParameterNames soap-enc:arrayType="xsd:string[1]"><string>Device.ManagementServer.ConnectionRequestURL</string></ParameterNames></cwmp:GetParameterValues>"#,
        ));
        script.requests.push_back(envelope(
            "dl-1",
            &format!(
                "<cwmp:Download><CommandKey>k1</CommandKey>\
                 <FileType>1 Firmware Upgrade Image</FileType><URL>{file_url}</URL></cwmp:Download>"
            ),
        ));
    }
    let acs_url = spawn_acs(script.clone()).await;

    let store = ParameterStore::from_json(DATA_MODEL).expect("data model");
    let simulator = start(store, "SIM-0001", &acs_url).await.expect("start simulator");

    wait_until(&script, "download response", |seen| count(seen, "DownloadResponse") == 1).await;
    wait_idle(&simulator).await;
    {
        let script = script.lock().expect("script");
        let seen = &script.seen;
        let inform =
            seen.iter().find(|item| item.method.as_deref() == Some("Inform")).expect("inform");
        assert_eq!(inform.authorization.as_deref(), Some("Basic Y3BlOnNlY3JldA=="));
        let inform = body(inform);
        assert_eq!(event_code(&inform), EVENT_PERIODIC);
        assert_eq!(
            inform.child("DeviceId").and_then(|id| id.child_text("SerialNumber")),
            Some("SIM-0001")
        );

        let gpv = seen
            .iter()
            .find(|item| item.method.as_deref() == Some("GetParameterValuesResponse"))
            .expect("gpv response");
        let gpv = body(gpv);
        let value = gpv
            .child("ParameterList")
            .and_then(|list| list.children.first())
            .and_then(|item| item.child_text("Value"));
        assert_eq!(value, Some(simulator.connection_request_url()));

        let download = seen
            .iter()
            .find(|item| item.method.as_deref() == Some("DownloadResponse"))
            .expect("download");
        let download = body(download);
        assert_eq!(download.child_text("Status"), Some("1"));
    }

    let fetched = tokio::time::timeout(Duration::from_secs(10), async {
        while served.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(fetched.is_ok(), "file server never hit");
    tokio::time::sleep(Duration::from_millis(200)).await;

    send_connection_request(simulator.connection_request_url()).await;
    wait_until(&script, "transfer complete", |seen| count(seen, "TransferComplete") == 1).await;

    {
        let script = script.lock().expect("script");
        let seen = &script.seen;
        let second_inform =
            seen.iter().rposition(|item| item.method.as_deref() == Some("Inform")).expect("inform");
        let report = seen
            .iter()
            .position(|item| item.method.as_deref() == Some("TransferComplete"))
            .expect("report");
        assert_eq!(count(seen, "Inform"), 2);
        assert!(second_inform < report);
        assert_eq!(event_code(&body(&seen[second_inform])), EVENT_CONNECTION_REQUEST);

        let report = body(&seen[report]);
        assert_eq!(report.child_text("CommandKey"), Some("k1"));
        let fault = report.child("FaultStruct").expect("fault struct");
        assert_eq!(fault.child_text("FaultCode"), Some("0"));
        assert_eq!(fault.child_text("FaultString"), Some(""));
    }

    simulator.shutdown().await;
}

async fn device_recovers_after_failed_inform(serial_number: &str, inform_reply: &str) {
    let script: Shared = Arc::default();
    script.lock().expect("script").inform_failure = Some(inform_reply.to_string());
    let acs_url = spawn_acs(script.clone()).await;

    let store = ParameterStore::from_json(DATA_MODEL).expect("data model");
    let simulator = start(store, serial_number, &acs_url).await.expect("start simulator");

    wait_until(&script, "first inform", |seen| count(seen, "Inform") == 1).await;
    wait_idle(&simulator).await;
    script.lock().expect("script").inform_failure = None;

    send_connection_request(simulator.connection_request_url()).await;
    wait_until(&script, "second session to finish", |seen| {
        count(seen, "Inform") == 2 && seen.last().is_some_and(|item| item.method.is_none())
    })
    .await;

    let script_guard = script.lock().expect("script");
    let inform = script_guard
        .seen
        .iter()
        .rfind(|item| item.method.as_deref() == Some("Inform"))
        .expect("inform");
    assert_eq!(event_code(&body(inform)), EVENT_CONNECTION_REQUEST);
    drop(script_guard);

    simulator.shutdown().await;
}

#[tokio::test]
async fn failed_session_does_not_stop_the_device() {
    let reply = "HTTP/1.1 500 Server Error\r\nContent-Length: 0\r\n\r\n";
    device_recovers_after_failed_inform("SIM-0002", reply).await;
}

#[tokio::test]
async fn oversized_inform_reply_fails_only_that_session() {
    let reply = "HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\n<soap-env:Envelope";
    device_recovers_after_failed_inform("SIM-0003", reply).await;
}
