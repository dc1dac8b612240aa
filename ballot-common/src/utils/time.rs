use std::time::{SystemTime, UNIX_EPOCH};

/// Current UNIX timestamp in seconds. A clock set before the epoch reads as 0.
pub fn current_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_non_zero() {
        assert!(current_time() > 0);
    }
}
