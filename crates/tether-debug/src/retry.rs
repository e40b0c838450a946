use crate::Error;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub budget: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            budget: 10,
            delay: Duration::from_millis(500),
        }
    }
}

/// Keep trying while the inspector isn't listening yet. Any other failure,
/// or running out of attempts, returns the last error unchanged.
pub async fn connect_with_retry<T, F, Fut>(policy: RetryPolicy, mut connect: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 1;
    loop {
        match connect().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.budget && is_connection_refused(&e) => {
                tracing::debug!(
                    "Debugger not listening yet ({}/{}): {}",
                    attempt,
                    policy.budget,
                    e
                );
                attempt += 1;
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Walk the source chain looking for a refused TCP connect
pub fn is_connection_refused(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn refused() -> Error {
        Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
    }

    fn fast(budget: u32) -> RetryPolicy {
        RetryPolicy {
            budget,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_retries_refused_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = connect_with_retry(fast(10), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(refused())
                } else {
                    Ok("connected")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "connected");
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_stops_at_budget_with_last_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), Error> = connect_with_retry(fast(3), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(refused()) }
        })
        .await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), Error> = connect_with_retry(fast(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Protocol("bad handshake".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_refused_found_in_nested_source() {
        let inner = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        let wrapped = Error::WebSocket(tokio_tungstenite::tungstenite::Error::Io(inner));
        assert!(is_connection_refused(&wrapped));

        let reset = Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(!is_connection_refused(&reset));
    }
}
