//! Deadlines and cancellation for pipeline steps

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};

/// Run `fut` under an optional deadline
///
/// `None` waits forever. On expiry the step fails with
/// `AppError::Timeout` naming `stage`.
pub async fn with_deadline<F, T>(stage: &'static str, deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout {
                stage,
                after_ms: limit.as_millis() as u64,
            }),
        },
        None => fut.await,
    }
}

/// Race `fut` against `token`; cancellation wins ties
pub async fn cancellable<F, T>(stage: &'static str, token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(AppError::Cancelled(format!("{} interrupted by stop", stage))),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let err = with_deadline("gathering", Some(Duration::from_millis(100)), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            AppError::Timeout {
                stage: "gathering",
                after_ms: 100
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_deadline_waits() {
        let value = with_deadline("signaling", None, async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(7)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancelled_step() {
        let token = CancellationToken::new();
        token.cancel();
        let err = cancellable("media", &token, async { Ok(()) }).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_uncancelled_step_passes_through() {
        let token = CancellationToken::new();
        let value = cancellable("media", &token, async { Ok("done") }).await.unwrap();
        assert_eq!(value, "done");
    }
}
