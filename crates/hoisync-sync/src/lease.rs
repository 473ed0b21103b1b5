//! Single-flight across processes
//!
//! The daemon and a manual `hoisync sync` share one state database. A
//! [`RunLease`] is a row in that database with an owner and an expiry; only
//! one wake-up holds it at a time. The holder renews it in the background,
//! so a crashed process blocks others for at most one TTL.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use hoisync_core::domain::SessionId;
use hoisync_core::ports::ISettingsStore;

/// How long a lease lives without renewal
pub const LEASE_TTL: Duration = Duration::from_secs(120);

/// A held run lease; call [`RunLease::release`] when the run ends
pub struct RunLease {
    settings: Arc<dyn ISettingsStore>,
    owner: String,
    stop_renewal: CancellationToken,
    renewal: Option<JoinHandle<()>>,
}

fn expiry(ttl: Duration) -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::milliseconds(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

impl RunLease {
    /// Takes the lease, or returns `None` when another run holds it
    pub async fn acquire(
        settings: Arc<dyn ISettingsStore>,
        ttl: Duration,
    ) -> anyhow::Result<Option<Self>> {
        let owner = SessionId::new().to_string();
        if !settings.try_acquire_run_lease(&owner, expiry(ttl)).await? {
            debug!("Run lease held by another run");
            return Ok(None);
        }

        let stop_renewal = CancellationToken::new();
        let renewal = tokio::spawn(renew(
            Arc::clone(&settings),
            owner.clone(),
            ttl,
            stop_renewal.clone(),
        ));
        debug!(owner = %owner, "Run lease acquired");

        Ok(Some(Self {
            settings,
            owner,
            stop_renewal,
            renewal: Some(renewal),
        }))
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Stops renewing and deletes the lease row
    pub async fn release(mut self) {
        self.stop_renewal.cancel();
        if let Some(renewal) = self.renewal.take() {
            let _ = renewal.await;
        }
        match self.settings.release_run_lease(&self.owner).await {
            Ok(()) => debug!(owner = %self.owner, "Run lease released"),
            Err(e) => warn!(owner = %self.owner, error = %e, "Failed to release run lease"),
        }
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        self.stop_renewal.cancel();
    }
}

async fn renew(
    settings: Arc<dyn ISettingsStore>,
    owner: String,
    ttl: Duration,
    stop: CancellationToken,
) {
    let period = ttl / 3;
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(period) => {}
        }
        match settings.try_acquire_run_lease(&owner, expiry(ttl)).await {
            Ok(true) => {}
            Ok(false) => warn!(owner = %owner, "Run lease taken over by another run"),
            Err(e) => warn!(owner = %owner, error = %e, "Failed to renew run lease"),
        }
    }
}
