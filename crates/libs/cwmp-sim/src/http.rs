//! Minimal HTTP/1.1 framing shared by the ACS client, the download fetcher and
//! the connection-request listener.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

const HEADER_END: &[u8] = b"\r\n\r\n";
const READ_CHUNK: usize = 4096;
/// Largest response or request head accepted.
pub const MAX_HEAD_LEN: usize = 64 * 1024;
/// Largest message body kept in memory.
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the server asked for the connection to be closed.
    pub fn closes_connection(&self) -> bool {
        self.header("connection").is_some_and(|value| value.eq_ignore_ascii_case("close"))
    }
}

pub fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(HEADER_END.len()).position(|window| window == HEADER_END)
}

pub fn parse_content_length(headers: &[u8]) -> Option<usize> {
    let text = String::from_utf8_lossy(headers);
    for line in text.lines() {
        let lower = line.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("content-length:") {
            if let Ok(length) = rest.trim().parse::<usize>() {
                return Some(length);
            }
        }
    }
    None
}

pub fn parse_headers(headers: &[u8]) -> Vec<(String, String)> {
    String::from_utf8_lossy(headers)
        .lines()
        .skip(1)
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// `(method, target)` from a request head.
pub fn parse_request_line(headers: &[u8]) -> Option<(String, String)> {
    let text = String::from_utf8_lossy(headers);
    let line = text.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();
    Some((method, target))
}

/// `(status, reason)` from a response head.
pub fn parse_status_line(headers: &[u8]) -> Option<(u16, String)> {
    let text = String::from_utf8_lossy(headers);
    let line = text.lines().next()?;
    let mut parts = line.splitn(3, ' ');
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    let status = parts.next()?.trim().parse::<u16>().ok()?;
    let reason = parts.next().unwrap_or_default().trim().to_string();
    Some((status, reason))
}

fn invalid(message: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn body_too_large() -> io::Error {
    invalid("message body exceeds size limit")
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == b"\r\n")
}

/// Decodes a complete chunked body. Returns the body and the number of bytes
/// consumed, or `None` when more input is needed.
pub fn decode_chunked(buffer: &[u8]) -> io::Result<Option<(Vec<u8>, usize)>> {
    let mut body = Vec::new();
    let mut offset = 0;
    loop {
        let Some(line_len) = find_crlf(&buffer[offset..]) else {
            return Ok(None);
        };
        let size_line = String::from_utf8_lossy(&buffer[offset..offset + line_len]);
        let size_text = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_text, 16).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, format!("invalid chunk size '{size_text}'"))
        })?;
        offset += line_len + 2;

        if size == 0 {
            // Skip trailers up to the terminating blank line.
            loop {
                let Some(trailer_len) = find_crlf(&buffer[offset..]) else {
                    return Ok(None);
                };
                offset += trailer_len + 2;
                if trailer_len == 0 {
                    return Ok(Some((body, offset)));
                }
            }
        }

        if size > MAX_BODY_LEN - body.len() {
            return Err(body_too_large());
        }
        let chunk_end = offset + size;
        if buffer.len() < chunk_end + 2 {
            return Ok(None);
        }
        body.extend_from_slice(&buffer[offset..chunk_end]);
        offset = chunk_end + 2;
    }
}

/// Status line and headers of a response, plus any body bytes that arrived
/// in the same reads.
#[derive(Clone, Debug)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub leftover: Vec<u8>,
}

impl ResponseHead {
    fn has_body(&self) -> bool {
        !(self.status == 204 || self.status == 304 || (100..200).contains(&self.status))
    }

    fn is_chunked(&self) -> bool {
        header_value(&self.headers, "transfer-encoding")
            .is_some_and(|value| value.to_ascii_lowercase().contains("chunked"))
    }

    fn content_length(&self) -> io::Result<Option<usize>> {
        match header_value(&self.headers, "content-length") {
            None => Ok(None),
            Some(text) => match text.parse::<u64>() {
                Ok(length) => usize::try_from(length).map(Some).map_err(|_| body_too_large()),
                Err(_) => Err(invalid("invalid content-length")),
            },
        }
    }
}

pub async fn read_response_head<S>(stream: &mut S) -> io::Result<ResponseHead>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut buffer = Vec::new();
    let header_end = loop {
        if let Some(header_end) = find_header_end(&buffer) {
            break header_end;
        }
        if buffer.len() > MAX_HEAD_LEN {
            return Err(invalid("response head exceeds size limit"));
        }
        if read_more(stream, &mut buffer).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before response head",
            ));
        }
    };

    let head = &buffer[..header_end];
    let (status, reason) = parse_status_line(head).ok_or_else(|| invalid("invalid status line"))?;
    let headers = parse_headers(head);
    let leftover = buffer.split_off(header_end + HEADER_END.len());
    Ok(ResponseHead { status, reason, headers, leftover })
}

/// Reads one response from `stream`. Bodies are framed by chunked encoding,
/// `Content-Length`, or connection close, in that order of preference.
pub async fn read_response<S>(stream: &mut S) -> io::Result<HttpResponse>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let head = read_response_head(stream).await?;
    let body = if !head.has_body() {
        Vec::new()
    } else if head.is_chunked() {
        let mut buffer = head.leftover.clone();
        loop {
            if let Some((body, _consumed)) = decode_chunked(&buffer)? {
                break body;
            }
            if buffer.len() > MAX_BODY_LEN + MAX_HEAD_LEN {
                return Err(body_too_large());
            }
            if read_more(stream, &mut buffer).await? == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated chunked body"));
            }
        }
    } else if let Some(length) = head.content_length()? {
        if length > MAX_BODY_LEN {
            return Err(body_too_large());
        }
        let mut buffer = head.leftover.clone();
        while buffer.len() < length {
            if read_more(stream, &mut buffer).await? == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated body"));
            }
        }
        buffer.truncate(length);
        buffer
    } else {
        let mut buffer = head.leftover.clone();
        while read_more(stream, &mut buffer).await? > 0 {
            if buffer.len() > MAX_BODY_LEN {
                return Err(body_too_large());
            }
        }
        buffer
    };

    let ResponseHead { status, reason, headers, .. } = head;
    Ok(HttpResponse { status, reason, headers, body })
}

/// Consumes the body that follows `head` without keeping it. Chunked and
/// close-delimited bodies are read to end of stream. Returns the number of
/// body bytes seen.
pub async fn discard_body<S>(stream: &mut S, head: &ResponseHead) -> io::Result<u64>
where
    S: AsyncRead + Unpin + ?Sized,
{
    if !head.has_body() {
        return Ok(0);
    }
    let already = head.leftover.len() as u64;
    let mut sink = tokio::io::sink();
    match head.content_length()? {
        Some(length) if !head.is_chunked() => {
            let length = length as u64;
            let remaining = length.saturating_sub(already);
            let drained = tokio::io::copy(&mut (&mut *stream).take(remaining), &mut sink).await?;
            if drained < remaining {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated body"));
            }
            Ok(already.min(length) + drained)
        }
        _ => Ok(already + tokio::io::copy(stream, &mut sink).await?),
    }
}

/// Reads a request head plus its `Content-Length` body, if any. Returns an
/// empty buffer when the peer closed without sending anything. Oversized
/// input is returned as read so far.
pub async fn read_request<S>(stream: &mut S) -> io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut buffer = Vec::new();
    loop {
        if read_more(stream, &mut buffer).await? == 0 {
            break;
        }
        match find_header_end(&buffer) {
            Some(header_end) => {
                let length = parse_content_length(&buffer[..header_end]).unwrap_or_default();
                let body_start = header_end + HEADER_END.len();
                if length > MAX_BODY_LEN || buffer.len() >= body_start + length {
                    break;
                }
            }
            None if buffer.len() > MAX_HEAD_LEN => break,
            None => {}
        }
    }
    Ok(buffer)
}

async fn read_more<S>(stream: &mut S, buffer: &mut Vec<u8>) -> io::Result<usize>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut chunk = [0_u8; READ_CHUNK];
    let read = stream.read(&mut chunk).await?;
    buffer.extend_from_slice(&chunk[..read]);
    Ok(read)
}

pub fn build_empty_response() -> Vec<u8> {
    b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_vec()
}
