//! Lock token generation for the distributed lock protocol.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Generates an opaque, owner-identifying lock token:
/// `lock:<unix-ms>:<random>`.
pub(crate) fn generate_token() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("lock:{millis}:{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_carry_the_expected_shape() {
        let token = generate_token();
        assert!(token.starts_with("lock:"));
        assert_eq!(token.split(':').count(), 3);
    }

    #[test]
    fn tokens_are_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
    }
}
