//! Wire codec (C1): `MAGIC‖TYPE|SENDER@IP|CONTENT\0`.
//!
//! Encoding and decoding are pure and allocation-light: `encode` builds one
//! `Vec<u8>` sized to the actual frame, `decode` borrows from the input
//! buffer wherever it can and only allocates where bounds truncation forces
//! an owned copy.

use std::borrow::Cow;

use crate::error::WireError;

/// Magic number prepended to every frame, big-endian on the wire ("CSDC").
pub const MAGIC: u32 = 0x4353_4443;
pub const MAGIC_LEN: usize = 4;

/// Maximum useful frame size, matching the existing C implementations this
/// protocol interoperates with.
pub const BUFFER_SIZE: usize = 1024;

pub const MAX_USERNAME_LEN: usize = 31;
pub const MAX_IP_LEN: usize = 15;

/// The closed set of frame types, plus an `Unknown` escape hatch so that
/// `decode` never has to fail just because a peer sent a type we don't
/// recognise — rejection of unrecognised types is the dispatcher's job
/// (§4.6), not the codec's.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameType {
    Discovery,
    DiscoveryResponse,
    Text,
    Quit,
    Unknown(String),
}

impl FrameType {
    pub fn as_str(&self) -> &str {
        match self {
            FrameType::Discovery => "DISCOVERY",
            FrameType::DiscoveryResponse => "DISCOVERY_RESPONSE",
            FrameType::Text => "TEXT",
            FrameType::Quit => "QUIT",
            FrameType::Unknown(s) => s.as_str(),
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "DISCOVERY" => FrameType::Discovery,
            "DISCOVERY_RESPONSE" => FrameType::DiscoveryResponse,
            "TEXT" => FrameType::Text,
            "QUIT" => FrameType::Quit,
            other => FrameType::Unknown(other.to_string()),
        }
    }
}

/// A parsed frame, owned by whichever handler received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    /// Username carried inside the payload, bounded to [`MAX_USERNAME_LEN`].
    pub sender_username: String,
    /// IP carried inside the payload. Informational only — routing must use
    /// the transport-level source address, never this field (see §4.5).
    pub sender_ip: String,
    /// Up to `BUFFER_SIZE - 1` bytes of opaque text.
    pub content: String,
}

impl Frame {
    pub fn new(
        frame_type: FrameType,
        sender_username: impl Into<String>,
        sender_ip: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Frame {
            frame_type,
            sender_username: sender_username.into(),
            sender_ip: sender_ip.into(),
            content: content.into(),
        }
    }
}

/// Encode a frame into a freshly allocated buffer.
///
/// `username` falls back to `"anon"`, `local_ip` to `"unknown"`, `content`
/// to an empty string when `None` or empty. Fails with [`WireError::TooSmall`]
/// rather than emitting a truncated frame.
pub fn encode(
    frame_type: &FrameType,
    username: Option<&str>,
    local_ip: Option<&str>,
    content: Option<&str>,
) -> Result<Vec<u8>, WireError> {
    if BUFFER_SIZE < MAGIC_LEN + 3 {
        return Err(WireError::TooSmall);
    }

    let username = non_empty(username).unwrap_or("anon");
    let ip = non_empty(local_ip).unwrap_or("unknown");
    let content = content.unwrap_or("");

    let mut payload =
        String::with_capacity(frame_type.as_str().len() + username.len() + ip.len() + content.len() + 3);
    payload.push_str(frame_type.as_str());
    payload.push('|');
    payload.push_str(username);
    payload.push('@');
    payload.push_str(ip);
    payload.push('|');
    payload.push_str(content);

    let total_len = MAGIC_LEN + payload.len() + 1;
    if total_len > BUFFER_SIZE {
        return Err(WireError::TooSmall);
    }

    let mut buf = Vec::with_capacity(total_len);
    buf.extend_from_slice(&MAGIC.to_be_bytes());
    buf.extend_from_slice(payload.as_bytes());
    buf.push(0);
    Ok(buf)
}

/// Decode a frame from a raw datagram or a single TCP frame's bytes.
///
/// Truncated or mismatched-magic input is rejected with
/// [`WireError::Malformed`]; it is never a panic.
pub fn decode(bytes: &[u8]) -> Result<Frame, WireError> {
    if bytes.len() < MAGIC_LEN + 3 {
        return Err(WireError::Malformed("frame shorter than the minimum length"));
    }

    let magic = u32::from_be_bytes(bytes[..MAGIC_LEN].try_into().unwrap());
    if magic != MAGIC {
        return Err(WireError::Malformed("magic mismatch"));
    }

    let mut payload = &bytes[MAGIC_LEN..];
    if let Some(nul_at) = payload.iter().position(|&b| b == 0) {
        payload = &payload[..nul_at];
    }
    let payload_str = String::from_utf8_lossy(payload);

    let mut parts = payload_str.splitn(3, '|');
    let type_tok = parts.next().unwrap_or("");
    let sender_tok = parts
        .next()
        .ok_or(WireError::Malformed("missing sender token"))?;
    let content_tok = parts
        .next()
        .ok_or(WireError::Malformed("missing content token"))?;

    let (username, ip) = match sender_tok.split_once('@') {
        Some((u, i)) => (u, i),
        // No '@' is tolerated: the whole token becomes the username and the
        // IP falls back to "unknown" (§4.1 — sloppy-sender interop).
        None => (sender_tok, "unknown"),
    };

    Ok(Frame {
        frame_type: FrameType::parse(type_tok),
        sender_username: truncate_to_bytes(username, MAX_USERNAME_LEN).into_owned(),
        sender_ip: truncate_to_bytes(ip, MAX_IP_LEN).into_owned(),
        content: truncate_to_bytes(content_tok, BUFFER_SIZE - 1).into_owned(),
    })
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|v| !v.is_empty())
}

/// Truncate `s` to at most `max_bytes` bytes without splitting a UTF-8
/// character. The wire format is documented as ASCII, so this only matters
/// for malformed or adversarial input.
fn truncate_to_bytes(s: &str, max_bytes: usize) -> Cow<'_, str> {
    if s.len() <= max_bytes {
        return Cow::Borrowed(s);
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(s[..end].to_string())
}
