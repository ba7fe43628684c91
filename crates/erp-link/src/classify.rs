//! Authentication-failure classification for inbound frames.
//!
//! A structured `code` field is checked first. Servers that only report a
//! human-readable `message` are handled by substring matching, kept for
//! compatibility with the existing application server; the marker lists below
//! are part of that server contract and must not be localized.

use serde_json::Value;

use crate::types::{AuthErrorKind, Frame};

const EXPIRED_CODES: &[&str] = &["TOKEN_EXPIRED", "JWT_EXPIRED"];
const UNAUTHORIZED_CODES: &[&str] = &["UNAUTHORIZED", "TOKEN_INVALID", "AUTH_REQUIRED"];

const EXPIRED_MARKERS: &[&str] = &["jwt expired", "token expired", "token has expired"];
const UNAUTHORIZED_MARKERS: &[&str] = &[
    "unauthorized",
    "invalid token",
    "jwt malformed",
    "invalid signature",
    "authentication required",
    "not authenticated",
];

/// Classify a frame as an authentication failure, if it is one.
///
/// Only frames with `success: false` qualify.
pub fn auth_failure(frame: &Frame) -> Option<AuthErrorKind> {
    if frame.success != Some(false) {
        return None;
    }
    structured_code(frame).or_else(|| message_markers(frame))
}

fn structured_code(frame: &Frame) -> Option<AuthErrorKind> {
    match frame.field("code")? {
        Value::String(code) => {
            let code = code.to_ascii_uppercase();
            if EXPIRED_CODES.contains(&code.as_str()) {
                Some(AuthErrorKind::Expired)
            } else if UNAUTHORIZED_CODES.contains(&code.as_str()) {
                Some(AuthErrorKind::Other)
            } else {
                None
            }
        }
        Value::Number(n) if n.as_u64() == Some(401) => Some(AuthErrorKind::Other),
        _ => None,
    }
}

fn message_markers(frame: &Frame) -> Option<AuthErrorKind> {
    let message = frame.message.as_deref()?.to_lowercase();
    if EXPIRED_MARKERS.iter().any(|m| message.contains(m)) {
        Some(AuthErrorKind::Expired)
    } else if UNAUTHORIZED_MARKERS.iter().any(|m| message.contains(m)) {
        Some(AuthErrorKind::Other)
    } else {
        None
    }
}
