//! Session identifiers.
//!
//! A session id is 128 bits rendered as 32 lowercase hex characters, chosen
//! by the wrapper before its first connect so it survives daemon restarts.
//! The user-facing short id is the first 8 characters; prefix collisions are
//! left to the resolver, which reports them as ambiguous.

use rand::Rng;

/// Number of hex characters in a full session id.
pub const SESSION_ID_LEN: usize = 32;

/// Number of hex characters in a short id.
pub const SHORT_ID_LEN: usize = 8;

/// Generate a random session id (16 bytes, hex-encoded).
pub fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

/// Validate and canonicalize a full session id. Accepts exactly 32 hex
/// characters in either case; returns the lowercase form.
pub fn parse_session_id(s: &str) -> Option<String> {
    if s.len() != SESSION_ID_LEN || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(s.to_ascii_lowercase())
}

/// The user-facing prefix of a full id.
pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_canonical() {
        let id = generate_session_id();
        assert_eq!(id.len(), SESSION_ID_LEN);
        assert_eq!(parse_session_id(&id), Some(id.clone()));
        assert_eq!(short_id(&id).len(), SHORT_ID_LEN);
        assert!(id.starts_with(&short_id(&id)));
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        assert!(parse_session_id("").is_none());
        assert!(parse_session_id("0123abcd").is_none());
        assert!(parse_session_id(&"g".repeat(32)).is_none());
        assert_eq!(
            parse_session_id("0123456789ABCDEF0123456789ABCDEF"),
            Some("0123456789abcdef0123456789abcdef".to_string())
        );
    }

    #[test]
    fn ids_are_unique_enough() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_ne!(a, b);
    }
}
