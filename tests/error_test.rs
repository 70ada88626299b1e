use std::time::Duration;

use keepsake::{KeepsakeError, Result};

#[test]
fn test_error_display() {
    let err = KeepsakeError::remote("students", "backend unavailable");
    let msg = err.to_string();
    assert!(msg.contains("students"));
    assert!(msg.contains("backend unavailable"));
}

#[test]
fn test_result_alias() {
    fn returns_error() -> Result<()> {
        Err(KeepsakeError::AuthRequired("prefs:u1".to_string()))
    }
    assert!(returns_error().is_err());
}

#[test]
fn json_errors_convert() {
    fn parse() -> Result<serde_json::Value> {
        Ok(serde_json::from_str("{oops")?)
    }
    assert!(matches!(parse(), Err(KeepsakeError::Json(_))));
}

// ============================================================================
// Storage classification
// ============================================================================

#[test]
fn storage_errors() {
    assert!(KeepsakeError::Storage("disk full".into()).is_storage());
    assert!(
        KeepsakeError::QuotaExceeded {
            needed: 10,
            available: 2
        }
        .is_storage()
    );
}

#[test]
fn non_storage_errors() {
    assert!(!KeepsakeError::Timeout(Duration::from_secs(30)).is_storage());
    assert!(
        !KeepsakeError::Validation {
            key: "class:1".into(),
            reason: "missing name".into()
        }
        .is_storage()
    );
    assert!(!KeepsakeError::remote("classes", "offline").is_storage());
}

// ============================================================================
// User-facing messages
// ============================================================================

#[test]
fn user_messages_name_the_problem() {
    assert!(
        KeepsakeError::AuthRequired("k".into())
            .user_message()
            .contains("signed in")
    );
    assert_eq!(
        KeepsakeError::Validation {
            key: "class:1".into(),
            reason: "missing name".into()
        }
        .user_message(),
        "Invalid data: missing name"
    );
    assert!(
        KeepsakeError::Timeout(Duration::from_secs(30))
            .user_message()
            .contains("kept")
    );
    assert!(
        KeepsakeError::Storage("disk full".into())
            .user_message()
            .contains("disk full")
    );
}
