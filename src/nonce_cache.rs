use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(20 * 60);

/// A time-expiring set of observed AEAD nonces.
///
/// Every decrypt path checks incoming nonces against a cache, and every
/// encrypt path registers the nonces it draws, so a captured record or
/// greeting replayed within the retention window is rejected.
#[derive(Debug)]
pub struct NonceCache {
    entries: Mutex<FxHashMap<Box<[u8]>, Instant>>,
    retention: Duration,
}

impl NonceCache {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            retention,
        }
    }

    pub fn with_default_retention() -> Self {
        Self::new(DEFAULT_RETENTION)
    }

    /// Atomically checks and records a nonce. Returns false when the nonce
    /// was already seen within the retention window.
    pub fn try_insert(&self, nonce: &[u8]) -> bool {
        let mut entries = self.entries.lock();
        if let Some(inserted_at) = entries.get(nonce) {
            if inserted_at.elapsed() <= self.retention {
                return false;
            }
        }
        entries.insert(nonce.to_vec().into_boxed_slice(), Instant::now());
        true
    }

    pub fn contains(&self, nonce: &[u8]) -> bool {
        let entries = self.entries.lock();
        match entries.get(nonce) {
            Some(inserted_at) => inserted_at.elapsed() <= self.retention,
            None => false,
        }
    }

    /// Removes entries older than the retention window.
    pub fn sweep(&self) {
        let retention = self.retention;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, inserted_at| inserted_at.elapsed() <= retention);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!("nonce sweep evicted {} of {} entries", evicted, before);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Handle to a background sweeper task. Dropping the handle leaves the task
/// running; call `shutdown` to stop it cooperatively.
#[derive(Debug)]
pub struct SweeperHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

/// Starts a task that sweeps `cache` every `interval` until shut down.
pub fn spawn_sweeper(cache: Arc<NonceCache>, interval: Duration) -> SweeperHandle {
    let token = CancellationToken::new();
    let sweep_token = token.clone();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    cache.sweep();
                }
                _ = sweep_token.cancelled() => {
                    return;
                }
            }
        }
    });
    SweeperHandle { token, task }
}
