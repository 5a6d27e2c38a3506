//! ID generation utilities for actloop
//!
//! Provides functions for generating unique identifiers for sessions and tool calls.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a unique session ID
///
/// Format: `run-{timestamp_ms}-{random_hex}`
/// Example: `run-1738300800123-a1b2`
pub fn generate_session_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("run-{}-{:04x}", timestamp, random)
}

/// Generate an id for a tool call that arrived without one
///
/// Format: `call_{index}_{random_hex}`
pub fn generate_call_id(index: usize) -> String {
    let random: u32 = rand::rng().random();
    format!("call_{}_{:08x}", index, random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        assert!(ts > 1577836800000); // 2020-01-01
        assert!(ts < 4102444800000); // 2100-01-01
    }

    #[test]
    fn test_generate_session_id_format() {
        let id = generate_session_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "run");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_call_id_format() {
        let id = generate_call_id(3);
        assert!(id.starts_with("call_3_"));
        assert_eq!(id.len(), "call_3_".len() + 8);
    }

    #[test]
    fn test_call_ids_are_unique() {
        let ids: std::collections::HashSet<String> = (0..50).map(generate_call_id).collect();
        assert_eq!(ids.len(), 50);
    }
}
