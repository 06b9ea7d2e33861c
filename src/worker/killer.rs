use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// TTL timer for one process invocation.
///
/// `expired` resolves once the deadline passes unless the killer was
/// disarmed first. `fire` reports `true` at most once.
#[derive(Debug)]
pub struct Killer {
    ttl: Option<Duration>,
    deadline: Option<Instant>,
    disarmed: CancellationToken,
    fired: AtomicBool,
}

impl Killer {
    /// Start the timer now. `None` or zero never expires.
    pub fn arm(ttl: Option<Duration>) -> Self {
        let ttl = ttl.filter(|d| !d.is_zero());
        Self {
            ttl,
            deadline: ttl.map(|d| Instant::now() + d),
            disarmed: CancellationToken::new(),
            fired: AtomicBool::new(false),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub async fn expired(&self) {
        let Some(deadline) = self.deadline else {
            return std::future::pending().await;
        };
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = self.disarmed.cancelled() => std::future::pending().await,
        }
    }

    /// Claim the kill. False if already fired or disarmed.
    pub fn fire(&self) -> bool {
        if self.disarmed.is_cancelled() {
            return false;
        }
        !self.fired.swap(true, Ordering::SeqCst)
    }

    pub fn disarm(&self) {
        self.disarmed.cancel();
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}
