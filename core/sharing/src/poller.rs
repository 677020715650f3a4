//! Recipient side of the sharing protocol: accepting inbound shares.
//!
//! The poller runs on a fixed interval while a session exists. Each poll
//! holds the session lock from the moment it checks for a session until
//! its last server call returns, so a concurrent logout waits for it and a
//! poll never starts with credentials from a session that has ended.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sealshare_common::{AggregateError, Error, FileId, Result};
use sealshare_remote::PendingShare;
use sealshare_vault::{ActiveSession, VaultClient};

/// Accepts shares addressed to the logged-in user.
pub struct SharePoller {
    client: Arc<VaultClient>,
}

impl SharePoller {
    pub fn new(client: Arc<VaultClient>) -> Self {
        Self { client }
    }

    /// Fetch and accept every pending share.
    ///
    /// Each share's document key is unwrapped with the user's private key,
    /// re-wrapped under the master key, and handed back to the server,
    /// which then drops the pending entry.
    ///
    /// # Returns
    /// Files whose shares were accepted.
    ///
    /// # Errors
    /// - `NotLoggedIn` without a session
    /// - `Aggregate` if any share could not be accepted; the others still are
    pub async fn poll_once(&self) -> Result<Vec<FileId>> {
        let guard = self.client.session().lock().await;
        let active = guard.as_ref().ok_or(Error::NotLoggedIn)?;

        let pending = self
            .client
            .remote()
            .list_pending_shares(active.credentials())
            .await?;
        debug!(count = pending.len(), "Pending shares");

        let mut accepted = Vec::with_capacity(pending.len());
        let mut failures = AggregateError::new();
        for share in pending {
            match self.accept(active, &share).await {
                Ok(()) => {
                    info!(file = %share.file, sender = %share.sender, "Share accepted");
                    accepted.push(share.file);
                }
                Err(e) => {
                    warn!(file = %share.file, sender = %share.sender, error = %e, "Failed to accept share");
                    failures.push(e);
                }
            }
        }
        drop(guard);

        failures.into_result()?;
        Ok(accepted)
    }

    async fn accept(&self, active: &ActiveSession, share: &PendingShare) -> Result<()> {
        let codec = self.client.codec();
        let keys = active.keys();
        let document_key =
            codec.unwrap_with_private_key(&share.wrapped_key, keys.key_pair().private_key())?;
        let rewrapped = codec.wrap_with_symmetric_key(&document_key, keys.symmetric())?;

        self.client
            .remote()
            .finalize_share(active.credentials(), &share.file, &share.sender, &rewrapped)
            .await
    }

    /// Run [`SharePoller::poll_once`] every `period` until stopped.
    pub fn spawn(self: Arc<Self>, period: Duration) -> PollerHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_secs = period.as_secs(), "Share poller started");

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.poll_once().await {
                            Ok(files) if !files.is_empty() => {
                                info!(count = files.len(), "Accepted inbound shares");
                            }
                            Ok(_) => {}
                            Err(Error::NotLoggedIn) => debug!("Poll skipped, not logged in"),
                            Err(e) => error!(error = %e, "Share poll failed"),
                        }
                    }
                }
            }

            info!("Share poller stopped");
        });

        PollerHandle {
            token,
            task: Some(task),
        }
    }
}

/// Handle to a running poller. Dropping it stops the poller.
pub struct PollerHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Ask the poller to stop. A poll already in flight runs to completion.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop and wait for the poller task to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Share poller task ended abnormally");
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
