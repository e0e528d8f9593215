//! Canonical signable strings.
//!
//! The backend rebuilds these byte-for-byte before verifying, so field
//! order and separators are part of the wire contract.

/// `hotkey:content_hash:timestamp`, signed for agent uploads.
pub fn file_info(hotkey: &str, content_hash: &str, timestamp: i64) -> String {
    format!("{hotkey}:{content_hash}:{timestamp}")
}

/// `hotkey:tournament:agent:timestamp[:log_hash]`, signed for every
/// evaluation operation. A cleared in-progress marker signs an empty agent
/// segment.
pub fn eval_info(
    hotkey: &str,
    tournament_id: &str,
    agent_id: Option<&str>,
    timestamp: i64,
    log_hash: Option<&str>,
) -> String {
    let agent = agent_id.unwrap_or("");
    match log_hash {
        Some(hash) => format!("{hotkey}:{tournament_id}:{agent}:{timestamp}:{hash}"),
        None => format!("{hotkey}:{tournament_id}:{agent}:{timestamp}"),
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_info() {
        assert_eq!(file_info("5Hk", "abc123", 1700), "5Hk:abc123:1700");
    }

    #[test]
    fn test_eval_info_variants() {
        assert_eq!(eval_info("5Hk", "t1", Some("a1"), 42, None), "5Hk:t1:a1:42");
        assert_eq!(
            eval_info("5Hk", "t1", Some("a1"), 42, Some("ff00")),
            "5Hk:t1:a1:42:ff00"
        );
        assert_eq!(eval_info("5Hk", "t1", None, 42, None), "5Hk:t1::42");
    }
}
