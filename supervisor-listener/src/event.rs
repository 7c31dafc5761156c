//! Decoding of the header line and payload block that make up a single supervisor event.

use crate::{Error, Result};
use indexmap::IndexMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// `key:value` pairs in the order they appeared. A repeated key keeps its first position but takes the later value.
pub type Fields = IndexMap<String, String>;

/// Longest header line accepted, newline included. Real supervisor headers are a couple of hundred bytes.
pub const MAX_HEADER_LEN: usize = 8 * 1024;

/// Upper bound on the payload buffer reserved up front, beyond that it grows as bytes actually arrive.
const MAX_PAYLOAD_PREALLOCATION: usize = 64 * 1024;

/// Splits `line` on whitespace and each token at its first `:`.
///
/// Every token must contain a `:`, anything else means the listener has lost track of the protocol.
pub fn decode_fields(line: &str) -> Result<Fields> {
    line.split_whitespace()
        .map(|token| match token.split_once(':') {
            Some((key, value)) => Ok((key.to_owned(), value.to_owned())),
            None => Err(Error::MalformedToken {
                token: token.to_owned(),
            }),
        })
        .collect()
}

/// A single event notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    pub header: Fields,
    /// Empty when the header declares no payload.
    pub payload: Fields,
}

impl Event {
    pub fn event_name(&self) -> Option<&str> {
        self.header.get("eventname").map(String::as_str)
    }

    /// The `processname` of the payload, or an empty string for events that do not concern a process.
    pub fn process_name(&self) -> &str {
        self.payload
            .get("processname")
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Length of the payload that follows `header`, 0 when `len` is missing or not positive.
fn payload_len(header: &Fields) -> Result<usize> {
    match header.get("len") {
        Some(len) => {
            let len: i64 = len
                .parse()
                .map_err(|_| Error::InvalidLength(len.to_owned()))?;
            Ok(usize::try_from(len).unwrap_or(0))
        }
        None => Ok(0),
    }
}

/// Reads the next event from `reader`.
///
/// Returns `Ok(None)` once the supervisor has closed the stream.
pub async fn read_event<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Event>> {
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(MAX_HEADER_LEN as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if read == MAX_HEADER_LEN && !line.ends_with(b"\n") {
        return Err(Error::HeaderTooLong {
            limit: MAX_HEADER_LEN,
        });
    }
    let header = decode_fields(&String::from_utf8(line).map_err(Error::HeaderEncoding)?)?;

    let expected = payload_len(&header)?;
    let payload = if expected > 0 {
        let mut bytes = Vec::with_capacity(expected.min(MAX_PAYLOAD_PREALLOCATION));
        let read = (&mut *reader)
            .take(expected as u64)
            .read_to_end(&mut bytes)
            .await?;
        if read < expected {
            return Err(Error::TruncatedPayload { read, expected });
        }
        decode_fields(&String::from_utf8(bytes)?)?
    } else {
        Fields::new()
    };

    Ok(Some(Event { header, payload }))
}
