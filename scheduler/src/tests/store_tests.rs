//! Tests for the store's transient-error classification
//!
//! Driver errors are constructed without a live server: an invalid
//! connection string yields a configuration error, a refused TCP connection
//! yields a driver-level I/O error.

use crate::store::is_transient;

#[test]
fn test_config_errors_are_not_transient() {
    // A bad connection parameter is a permanent error; retrying cannot fix it.
    let err = match "host=127.0.0.1 port=notanumber".parse::<tokio_postgres::Config>() {
        Ok(_) => panic!("invalid port value should not parse"),
        Err(e) => e,
    };
    assert!(!is_transient(&err));
}

#[tokio::test]
async fn test_connection_failures_are_transient() {
    // Nothing listens on port 1; the refused connection must be retryable
    // so a database restart degrades into latency, not lost transitions.
    let mut config = tokio_postgres::Config::new();
    config
        .host("127.0.0.1")
        .port(1)
        .user("scheduler")
        .dbname("jobs")
        .connect_timeout(std::time::Duration::from_secs(5));
    let err = match config.connect(tokio_postgres::NoTls).await {
        Ok(_) => panic!("connect to a closed port should fail"),
        Err(e) => e,
    };
    assert!(is_transient(&err));
}
