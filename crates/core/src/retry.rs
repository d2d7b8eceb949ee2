use std::io;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            delay: Duration::from_millis(100),
        }
    }
}

/// Runs `op` until it succeeds, `is_retryable` rejects the error, or the attempts run out.
/// At least one attempt is always made.
pub fn retry<T, E>(
    policy: &RetryPolicy,
    mut op: impl FnMut() -> Result<T, E>,
    mut is_retryable: impl FnMut(&E) -> bool,
) -> Result<T, E> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && is_retryable(&err) => {
                attempt += 1;
                thread::sleep(policy.delay);
            }
            Err(err) => return Err(err),
        }
    }
}

pub fn is_transient_io(err: &io::Error) -> bool {
    !matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::Unsupported | io::ErrorKind::InvalidInput
    )
}
