//! Session id generation and validation
//!
//! Ids are opaque, case-sensitive strings. The generator produces the short
//! upper-case codes people read out to each other; the relay accepts any id
//! that passes [`validate_session_id`].

use crate::error::{ProtocolError, ProtocolResult};
use rand::Rng;

/// Characters used by [`generate_session_id`]
pub const SESSION_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of generated session ids
pub const SESSION_ID_LEN: usize = 8;

/// Generate a random session id such as `K7Q2ZD0M`
pub fn generate_session_id() -> String {
    let mut rng = rand::rng();
    (0..SESSION_ID_LEN)
        .map(|_| {
            let idx = rng.random_range(0..SESSION_ID_ALPHABET.len());
            SESSION_ID_ALPHABET[idx] as char
        })
        .collect()
}

/// Check that a session id is usable as a registry key
pub fn validate_session_id(id: &str, max_len: usize) -> ProtocolResult<()> {
    if id.is_empty() {
        return Err(ProtocolError::InvalidSessionId(
            "session id must not be empty".to_string(),
        ));
    }

    if id.len() > max_len {
        return Err(ProtocolError::InvalidSessionId(format!(
            "session id is {} bytes (max: {})",
            id.len(),
            max_len
        )));
    }

    if id.chars().any(char::is_control) {
        return Err(ProtocolError::InvalidSessionId(
            "session id contains control characters".to_string(),
        ));
    }

    Ok(())
}
