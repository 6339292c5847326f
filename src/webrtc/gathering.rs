//! ICE gathering barrier
//!
//! The offer is only sent once candidate gathering has finished (no trickle
//! ICE), so the offer SDP carries every candidate.

use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use super::state::IceGatheringState;
use crate::error::{AppError, Result};
use crate::utils::with_deadline;

/// One-shot wait for `IceGatheringState::Complete`
///
/// `wait` consumes the barrier, so it resolves at most once. The watch
/// receiver is dropped when it returns, which also unsubscribes it.
pub struct IceGatheringBarrier {
    rx: watch::Receiver<IceGatheringState>,
}

impl IceGatheringBarrier {
    pub fn new(rx: watch::Receiver<IceGatheringState>) -> Self {
        Self { rx }
    }

    pub fn is_complete(&self) -> bool {
        *self.rx.borrow() == IceGatheringState::Complete
    }

    /// Wait for gathering to complete, bounded by `deadline` if given
    pub async fn wait(mut self, deadline: Option<Duration>) -> Result<()> {
        if self.is_complete() {
            debug!("ICE gathering already complete");
            return Ok(());
        }

        with_deadline("ICE gathering", deadline, async move {
            self.rx
                .wait_for(|state| *state == IceGatheringState::Complete)
                .await
                .map_err(|_| {
                    AppError::WebRtcError("Connection dropped before ICE gathering completed".to_string())
                })?;
            debug!("ICE gathering complete");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::state::StateTracker;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    #[test]
    fn test_resolves_immediately_when_complete() {
        let mut tracker = StateTracker::<IceGatheringState>::new();
        tracker.observe(IceGatheringState::Gathering);
        tracker.observe(IceGatheringState::Complete);

        let barrier = IceGatheringBarrier::new(tracker.watch());
        assert!(barrier.is_complete());
        let mut wait = task::spawn(barrier.wait(None));
        assert_ready_ok!(wait.poll());
    }

    #[test]
    fn test_resolves_once_on_completion() {
        let mut tracker = StateTracker::<IceGatheringState>::new();
        let mut wait = task::spawn(IceGatheringBarrier::new(tracker.watch()).wait(None));
        assert_pending!(wait.poll());

        tracker.observe(IceGatheringState::Gathering);
        assert_pending!(wait.poll());

        tracker.observe(IceGatheringState::Complete);
        assert!(wait.is_woken());
        assert_ready_ok!(wait.poll());

        // Later reports are not transitions and notify nobody
        let observer = tracker.watch();
        assert!(tracker.observe(IceGatheringState::Complete).is_none());
        assert!(tracker.observe(IceGatheringState::Gathering).is_none());
        assert!(!observer.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let tracker = StateTracker::<IceGatheringState>::new();
        let err = IceGatheringBarrier::new(tracker.watch())
            .wait(Some(Duration::from_millis(5000)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout { after_ms: 5000, .. }));
    }

    #[tokio::test]
    async fn test_dropped_connection_fails() {
        let tracker = StateTracker::<IceGatheringState>::new();
        let barrier = IceGatheringBarrier::new(tracker.watch());
        drop(tracker);
        assert!(matches!(barrier.wait(None).await, Err(AppError::WebRtcError(_))));
    }
}
