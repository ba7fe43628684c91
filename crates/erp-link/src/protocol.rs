//! Wire envelope constants and JSON encode/decode.

use tokio_tungstenite::tungstenite;

use crate::Error;
use crate::types::Frame;

// ---------------------------------------------------------------------------
// Frame type constants
// ---------------------------------------------------------------------------

pub mod kind {
    pub const HEARTBEAT: &str = "heartbeat";
    pub const HEARTBEAT_RESPONSE: &str = "heartbeat_response";
}

/// Close codes sent on deliberate closes.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    /// Reported when the socket goes away without a close frame.
    pub const ABNORMAL: u16 = 1006;
}

// ---------------------------------------------------------------------------
// Encode / decode helpers
// ---------------------------------------------------------------------------

pub fn encode_frame(frame: &Frame) -> Result<String, Error> {
    Ok(serde_json::to_string(frame)?)
}

pub fn decode_frame(text: &str) -> Result<Frame, Error> {
    Ok(serde_json::from_str(text)?)
}

/// Decode a text or binary WebSocket message. Returns `None` for control frames.
pub fn decode_ws_message(msg: &tungstenite::Message) -> Option<Result<Frame, Error>> {
    match msg {
        tungstenite::Message::Text(text) => Some(decode_frame(text.as_str())),
        tungstenite::Message::Binary(data) => Some(serde_json::from_slice(data).map_err(Error::from)),
        _ => None,
    }
}

/// Liveness probe: `{ type: "heartbeat", timestamp, token }`.
pub fn heartbeat_probe(token: Option<String>) -> Frame {
    let mut frame = Frame::new(kind::HEARTBEAT).with_field(
        "timestamp",
        chrono::Utc::now().timestamp_millis(),
    );
    frame.token = token;
    frame
}

pub fn is_heartbeat_ack(frame: &Frame) -> bool {
    frame.is_kind(kind::HEARTBEAT_RESPONSE)
}
