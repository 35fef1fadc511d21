//! Async test helpers
//!
//! Timeout-wrapped channel operations so a broken event flow fails a test
//! instead of hanging it.

use std::fmt;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Receive from a channel with a timeout
pub async fn recv_timeout<T>(
    rx: &mut mpsc::Receiver<T>,
    duration: Duration,
) -> Result<T, RecvTimeoutError> {
    timeout(duration, rx.recv())
        .await
        .map_err(|_| RecvTimeoutError::Timeout)?
        .ok_or(RecvTimeoutError::Closed)
}

/// Receive with the default one-second test budget
pub async fn recv_soon<T>(rx: &mut mpsc::Receiver<T>) -> T {
    recv_timeout(rx, Duration::from_secs(1))
        .await
        .expect("expected an event within the test budget")
}

/// Assert that no event arrives within a short window
pub async fn expect_silence<T: fmt::Debug>(rx: &mut mpsc::Receiver<T>, duration: Duration) {
    if let Ok(event) = recv_timeout(rx, duration).await {
        panic!("expected silence, got {:?}", event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Closed,
}

impl fmt::Display for RecvTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecvTimeoutError::Timeout => write!(f, "receive operation timed out"),
            RecvTimeoutError::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for RecvTimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recv_timeout_times_out() {
        let (_tx, mut rx) = mpsc::channel::<u8>(1);
        let result = recv_timeout(&mut rx, Duration::from_millis(10)).await;
        assert_eq!(result, Err(RecvTimeoutError::Timeout));
    }

    #[tokio::test]
    async fn test_recv_timeout_reports_closed() {
        let (tx, mut rx) = mpsc::channel::<u8>(1);
        drop(tx);
        let result = recv_timeout(&mut rx, Duration::from_millis(10)).await;
        assert_eq!(result, Err(RecvTimeoutError::Closed));
    }

    #[tokio::test]
    async fn test_recv_soon_delivers() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.send(7u8).await.unwrap();
        assert_eq!(recv_soon(&mut rx).await, 7);
    }
}
