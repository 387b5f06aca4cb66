use rand_core::{OsRng, RngCore};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Placeholder timestamp CWMP uses for "unknown time".
pub const ZERO_DATE: &str = "0001-01-01T00:00:00Z";

const REQUEST_ID_LEN: usize = 8;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn now_iso8601() -> String {
    format_iso8601(OffsetDateTime::now_utc())
}

pub fn format_iso8601(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| ZERO_DATE.to_string())
}

/// Random lowercase base36 id for the `cwmp:ID` header.
pub fn new_request_id() -> String {
    let mut seed = OsRng.next_u64();
    let mut id = String::with_capacity(REQUEST_ID_LEN);
    for _ in 0..REQUEST_ID_LEN {
        id.push(BASE36[(seed % 36) as usize] as char);
        seed /= 36;
    }
    id
}
