//! Degraded-mode recovery.
//!
//! After the push connection is lost the tab stops normal operation and
//! calls [`wait_for_recovery`], which polls the server's health endpoint
//! at a fixed cadence until the server answers again or the
//! [`CancellationToken`] is triggered.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use solasola_client::{ApiError, SolaSolaApi};

/// Something that can tell whether the server is back.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_up(&self) -> Result<bool, ApiError>;
}

#[async_trait]
impl HealthProbe for SolaSolaApi {
    async fn is_up(&self) -> Result<bool, ApiError> {
        Ok(self.health().await?.is_up())
    }
}

/// Poll `probe` every `interval` until it reports the server up.
///
/// The first probe is immediate. Returns the number of probes made, or
/// `None` if cancelled first.
pub async fn wait_for_recovery(
    probe: &dyn HealthProbe,
    interval: Duration,
    cancel: &CancellationToken,
) -> Option<u32> {
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Offline recovery cancelled");
                return None;
            }
            result = probe.is_up() => {
                match result {
                    Ok(true) => {
                        tracing::info!(attempt, "Server is reachable again");
                        return Some(attempt);
                    }
                    Ok(false) => {
                        tracing::debug!(attempt, "Server answered but is not healthy");
                    }
                    Err(e) => {
                        tracing::debug!(attempt, error = %e, "Server still unreachable");
                    }
                }
            }
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProbe {
        calls: AtomicU32,
        up_after: u32,
    }

    #[async_trait]
    impl HealthProbe for FlakyProbe {
        async fn is_up(&self) -> Result<bool, ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < self.up_after {
                Err(ApiError::Status {
                    status: 502,
                    body: String::new(),
                })
            } else {
                Ok(true)
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_server_answers() {
        let probe = FlakyProbe {
            calls: AtomicU32::new(0),
            up_after: 3,
        };
        let start = tokio::time::Instant::now();

        let attempts = wait_for_recovery(&probe, Duration::from_secs(5), &CancellationToken::new()).await;

        assert_eq!(attempts, Some(3));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let probe = FlakyProbe {
            calls: AtomicU32::new(0),
            up_after: u32::MAX,
        };
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            canceller.cancel();
        });

        let result = wait_for_recovery(&probe, Duration::from_secs(5), &cancel).await;

        assert!(result.is_none());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }
}
