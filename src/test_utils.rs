//! Test utilities for lepotato
//!
//! Temporary storage, configuration fixtures, stream body builders and
//! assertion helpers shared by the unit tests.

use crate::config::Config;
use std::path::Path;
use tempfile::TempDir;

/// Create a temporary directory for testing
///
/// # Returns
///
/// Returns a TempDir that will be cleaned up when dropped
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// Configuration whose local state lives under `dir`
///
/// # Arguments
///
/// * `dir` - Directory for the chat mirror and the session stats
/// * `base_url` - Backend base URL
pub fn test_config(dir: &Path, base_url: &str) -> Config {
    let mut config = Config::default();
    config.backend.base_url = base_url.to_string();
    config.backend.timeout_seconds = 5;
    config.storage.cache_path = Some(dir.join("chats.db"));
    config.storage.session_dir = Some(dir.join("session"));
    config.storage.session_name = "test".to_string();
    config
}

/// A complete YAML configuration
pub fn test_config_yaml() -> String {
    r#"
backend:
  base_url: http://127.0.0.1:8000
  timeout_seconds: 30

chat:
  more_page_size: 20
  default_max_tokens: 4096

storage:
  cache_path: /tmp/lepotato-test/chats.db
  session_name: ci
"#
    .to_string()
}

/// Build a stream body from JSON payloads, terminated by `[DONE]`
///
/// # Examples
///
/// ```ignore
/// let body = sse_body(&[r#"{"content":"a"}"#]);
/// assert_eq!(body, "data: {\"content\":\"a\"}\n\ndata: [DONE]\n\n");
/// ```
pub fn sse_body(payloads: &[&str]) -> String {
    let mut body = String::new();
    for payload in payloads {
        body.push_str("data: ");
        body.push_str(payload);
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Assert that an error contains the expected message
///
/// # Panics
///
/// Panics if the result is Ok or if the error doesn't contain the expected message
pub fn assert_error_contains<T: std::fmt::Debug>(result: crate::error::Result<T>, expected: &str) {
    match result {
        Ok(value) => panic!("Expected error containing '{}' but got Ok({:?})", expected, value),
        Err(e) => {
            let error_msg = format!("{:#}", e);
            assert!(
                error_msg.contains(expected),
                "Error message '{}' does not contain '{}'",
                error_msg,
                expected
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LepotatoError;

    #[test]
    fn test_temp_dir_creation() {
        let dir = temp_dir();
        assert!(dir.path().exists());
    }

    #[test]
    fn test_test_config_is_valid_and_isolated() {
        let dir = temp_dir();
        let config = test_config(dir.path(), "http://127.0.0.1:9");
        assert!(config.validate().is_ok());
        assert!(config.storage.session_dir().starts_with(dir.path()));
    }

    #[test]
    fn test_test_config_yaml_parses() {
        let config: Config = serde_yaml::from_str(&test_config_yaml()).unwrap();
        assert_eq!(config.chat.more_page_size, 20);
        assert_eq!(config.chat.default_max_tokens, 4096);
        assert_eq!(config.storage.session_name, "ci");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sse_body_ends_with_done() {
        let body = sse_body(&[r#"{"content":"a"}"#]);
        assert_eq!(body, "data: {\"content\":\"a\"}\n\ndata: [DONE]\n\n");
    }

    #[test]
    fn test_assert_error_contains_success() {
        let result: crate::error::Result<()> =
            Err(LepotatoError::Config("test error message".to_string()).into());
        assert_error_contains(result, "test error");
    }

    #[test]
    #[should_panic(expected = "Expected error containing")]
    fn test_assert_error_contains_ok() {
        assert_error_contains(Ok(()), "error");
    }
}
