//! Run-completion handle

use std::future::IntoFuture;

use once_cell::sync::Lazy;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Process-wide token that is cancelled once on first use and never touched
/// again. Handed out for controllers with no run in flight.
static RESOLVED: Lazy<CancellationToken> = Lazy::new(|| {
    let token = CancellationToken::new();
    token.cancel();
    token
});

/// Completion signal for one run of a [`crate::ProcessController`]
///
/// Any number of clones may wait at the same time; all of them wake when the
/// run completes. The handle is read-only, only the controller can resolve it.
///
/// ```rust,no_run
/// # async fn example(controller: overseer_process::ProcessController) {
/// controller.done().await;
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Done {
    token: CancellationToken,
}

impl Done {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Handle that is already resolved
    pub fn resolved() -> Self {
        Self::new(RESOLVED.clone())
    }

    /// Whether the run has completed
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for the run to complete
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}

impl IntoFuture for Done {
    type Output = ();
    type IntoFuture = WaitForCancellationFutureOwned;

    fn into_future(self) -> Self::IntoFuture {
        self.token.cancelled_owned()
    }
}
