//! Kafka topic name validation
//!
//! Key rules (as enforced by Kafka brokers):
//! - Topic names must be at least 1 character
//! - Topic names must not exceed 249 bytes
//! - `.` and `..` are reserved
//! - Only ASCII alphanumerics, `.`, `_` and `-` are legal

/// Maximum length of a Kafka topic name
pub const MAX_TOPIC_LENGTH: usize = 249;

/// Validate a topic name before it is handed to the broker client
pub fn validate_topic_name(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic name cannot be empty");
    }

    if topic.len() > MAX_TOPIC_LENGTH {
        return Err("topic name exceeds maximum length");
    }

    if topic == "." || topic == ".." {
        return Err("topic name cannot be '.' or '..'");
    }

    if !topic.bytes().all(is_legal_char) {
        return Err("topic name contains illegal characters");
    }

    Ok(())
}

fn is_legal_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_topic_name() {
        assert!(validate_topic_name("orders").is_ok());
        assert!(validate_topic_name("orders.v2").is_ok());
        assert!(validate_topic_name("user_events-eu").is_ok());
        assert!(validate_topic_name("...").is_ok());

        assert!(validate_topic_name("").is_err());
        assert!(validate_topic_name(".").is_err());
        assert!(validate_topic_name("..").is_err());
        assert!(validate_topic_name("orders/eu").is_err());
        assert!(validate_topic_name("orders eu").is_err());
        assert!(validate_topic_name("zamówienia").is_err());
    }

    #[test]
    fn test_validate_topic_name_length() {
        let max = "a".repeat(MAX_TOPIC_LENGTH);
        assert!(validate_topic_name(&max).is_ok());

        let too_long = "a".repeat(MAX_TOPIC_LENGTH + 1);
        assert_eq!(
            validate_topic_name(&too_long),
            Err("topic name exceeds maximum length")
        );
    }
}
