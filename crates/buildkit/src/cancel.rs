//! Run-wide cancellation shared by the archive walk and the status loop.

use dockyard_core::{Error, Result};
pub use tokio_util::sync::CancellationToken;

/// Early exit for blocking loops that cannot await `cancelled()`.
pub trait CancelCheck {
    /// `Err(Error::Cancelled)` once cancellation was requested.
    fn check(&self) -> Result<()>;
}

impl CancelCheck for CancellationToken {
    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_check() {
        let cancel = CancellationToken::new();
        assert!(cancel.check().is_ok());
        cancel.clone().cancel();
        assert!(matches!(cancel.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_child_token_sees_parent_cancel() {
        let run = CancellationToken::new();
        let project = run.child_token();
        run.cancel();
        assert!(matches!(project.check(), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let cancel = CancellationToken::new();
        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { cancel.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
