use super::{BrokerError, logging};

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warning");
    logging::init("nonsense");
}

#[test]
fn validation_errors_are_descriptive() {
    let err = BrokerError::validation("topic must not be empty");
    assert!(err.is_validation());
    assert_eq!(err.to_string(), "invalid request: topic must not be empty");
}

#[test]
fn storage_errors_are_not_validation_errors() {
    let err = BrokerError::from(sled::Error::Unsupported("read only".to_string()));
    assert!(!err.is_validation());
    assert!(err.to_string().starts_with("storage failure"));
}
