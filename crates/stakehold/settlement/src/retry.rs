//! Bounded, cancellable backoff for the processor leg.

use crate::coordinator::SettlementError;
use stakehold_escrow::EscrowError;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

/// Bounded backoff: `attempts` tries, delay doubling from
/// `initial_delay` up to `max_delay`.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Run `op`, retrying only `ProcessorUnavailable` with bounded backoff.
///
/// The caller-supplied `cancel` signal aborts between attempts; a
/// completed attempt is always recorded before cancellation is observed,
/// so no partial transition is left behind. After exhaustion the last
/// transient error is surfaced for manual remediation.
pub async fn with_backoff<T, F, Fut>(
    policy: BackoffPolicy,
    mut cancel: watch::Receiver<bool>,
    mut op: F,
) -> Result<T, SettlementError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EscrowError>>,
{
    let attempts = policy.attempts.max(1);
    let mut delay = policy.initial_delay;

    for attempt in 1..=attempts {
        if *cancel.borrow() {
            return Err(SettlementError::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(EscrowError::ProcessorUnavailable(reason)) if attempt < attempts => {
                warn!(attempt, %reason, delay_ms = delay.as_millis() as u64, "Processor unavailable, backing off");
                if sleep_or_cancel(delay, &mut cancel).await {
                    return Err(SettlementError::Cancelled);
                }
                delay = (delay * 2).min(policy.max_delay);
            }
            Err(err) => return Err(err.into()),
        }
    }
    unreachable!("loop returns on the final attempt")
}

/// Returns true when cancelled before the delay elapsed.
async fn sleep_or_cancel(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = cancel.changed() => match changed {
                Ok(()) if *cancel.borrow() => return true,
                Ok(()) => continue,
                Err(_) => {
                    sleep.as_mut().await;
                    return false;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_cancel() -> watch::Receiver<bool> {
        let (_tx, rx) = watch::channel(false);
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);

        let result = with_backoff(BackoffPolicy::default(), no_cancel(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EscrowError::ProcessorUnavailable("down".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_the_transient_error() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_backoff(BackoffPolicy::default(), no_cancel(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EscrowError::ProcessorUnavailable("still down".to_string())) }
        })
        .await;

        assert!(matches!(
            result,
            Err(SettlementError::Escrow(EscrowError::ProcessorUnavailable(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_backoff(BackoffPolicy::default(), no_cancel(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EscrowError::ProcessorRejected("declined".to_string())) }
        })
        .await;

        assert!(matches!(
            result,
            Err(SettlementError::Escrow(EscrowError::ProcessorRejected(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_retry_loop() {
        let (tx, rx) = watch::channel(false);
        let calls = std::sync::Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let handle = tokio::spawn(with_backoff(
            BackoffPolicy {
                attempts: 5,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(8),
            },
            rx,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(EscrowError::ProcessorUnavailable("down".to_string())) }
            },
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(SettlementError::Cancelled)));
        // The first attempt ran; cancellation landed during its delay.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
