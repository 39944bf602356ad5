//! Utility functions shared across the scheduler components.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Fibonacci backoff schedule with a total time budget.
///
/// Yields 1, 1, 2, 3, 5, 8, ... second delays until the budget is spent;
/// the transient SSH, SFTP, database and webhook errors all retry on this
/// schedule with a 60 second budget.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    next: u64,
    after: u64,
    spent: Duration,
    budget: Duration,
}

impl FibonacciBackoff {
    pub fn new(budget: Duration) -> Self {
        Self {
            next: 1,
            after: 1,
            spent: Duration::ZERO,
            budget,
        }
    }

    /// The standard 60 second budget.
    pub fn default_budget() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl Iterator for FibonacciBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = Duration::from_secs(self.next);
        if self.spent + delay > self.budget {
            return None;
        }
        self.spent += delay;
        let upcoming = self.next + self.after;
        self.next = self.after;
        self.after = upcoming;
        Some(delay)
    }
}

/// Run an async operation, retrying transient failures on a Fibonacci
/// schedule until the 60 second budget is exhausted. The last error is
/// returned once the budget runs out or the error is not transient.
pub async fn retry_fibo<T, E, F, Fut, P>(mut op: F, is_transient: P) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut backoff = FibonacciBackoff::default_budget();
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) => match backoff.next() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }
}

/// Random lowercase ASCII string of the given length.
pub fn rnd_lowercase(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| rng.random_range(b'a'..=b'z') as char)
        .collect()
}

/// Random lowercase hex string of the given length.
pub fn rnd_hex(len: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| HEX[rng.random_range(0..HEX.len())] as char)
        .collect()
}

/// Placeholder node name reserving provisioning capacity: `prov` plus ten
/// random hex characters.
pub fn generate_placeholder_ip() -> String {
    format!("{}{}", crate::models::PLACEHOLDER_PREFIX, rnd_hex(10))
}

/// Random name with a prefix, like `node-abcdefgh` or `yakey-abcdefgh`.
pub fn rnd_name(prefix: &str) -> String {
    format!("{}-{}", prefix, rnd_lowercase(8))
}

/// Timestamp part of task folder names: `YYYYMMDD_HHMMSS`.
pub fn timestamp_folder_part() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}
