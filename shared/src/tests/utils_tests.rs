//! Tests for shared utilities

use crate::utils::{
    generate_placeholder_ip, retry_fibo, rnd_lowercase, rnd_name, FibonacciBackoff,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[test]
fn test_fibonacci_schedule() {
    let delays: Vec<u64> = FibonacciBackoff::new(Duration::from_secs(60))
        .map(|d| d.as_secs())
        .collect();
    // 1+1+2+3+5+8+13+21 = 54; the next delay (34) would exceed the budget.
    assert_eq!(delays, vec![1, 1, 2, 3, 5, 8, 13, 21]);
}

#[test]
fn test_fibonacci_small_budget() {
    let delays: Vec<u64> = FibonacciBackoff::new(Duration::from_secs(2))
        .map(|d| d.as_secs())
        .collect();
    assert_eq!(delays, vec![1, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_retry_fibo_retries_transient_errors() {
    let attempts = AtomicUsize::new(0);
    let result: Result<u32, &str> = retry_fibo(
        || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(7)
                }
            }
        },
        |_| true,
    )
    .await;
    assert_eq!(result, Ok(7));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_fibo_gives_up_on_permanent_errors() {
    let attempts = AtomicUsize::new(0);
    let result: Result<u32, &str> = retry_fibo(
        || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("fatal") }
        },
        |_| false,
    )
    .await;
    assert_eq!(result, Err("fatal"));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_placeholder_ip_shape() {
    let ip = generate_placeholder_ip();
    assert_eq!(ip.len(), 14);
    assert!(ip.starts_with("prov"));
    assert!(ip[4..].chars().all(|c| c.is_ascii_hexdigit()));
    assert!(!crate::models::is_real_ip(&ip));
}

#[test]
fn test_random_names() {
    let name = rnd_lowercase(4);
    assert_eq!(name.len(), 4);
    assert!(name.chars().all(|c| c.is_ascii_lowercase()));

    let key = rnd_name("yakey");
    assert!(key.starts_with("yakey-"));
    assert_eq!(key.len(), "yakey-".len() + 8);
}
