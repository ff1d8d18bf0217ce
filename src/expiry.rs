//! Background expiry sweeper.
//!
//! Expired records stay readable until the sweeper removes them. Every pass
//! pops the due keys off the TTL index and deletes them through the logged
//! delete path, so a replay after restart sees the expirations too.
//!
//! The sweeper runs a pass as soon as it starts and then once per interval.
//! It stops between passes when either its own handle asks it to or when an
//! externally supplied shutdown signal flips to `true`; a pass already in
//! progress always completes.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, trace};

use crate::storage::Shared;

/// Handle to the running sweeper task.
///
/// Dropping the handle signals the task to stop without waiting for it.
#[derive(Debug)]
pub struct ExpirySweeper {
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    pub(crate) fn start(
        shared: Arc<Shared>,
        interval: Duration,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(sweeper_loop(shared, interval, stop_rx, shutdown));

        info!(interval_ms = interval.as_millis() as u64, "expiry sweeper started");

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signals the task and waits for it to finish its current pass.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("expiry sweeper task failed: {}", e);
            }
        }
        info!("expiry sweeper stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

async fn sweeper_loop(
    shared: Arc<Shared>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
    mut shutdown: Option<watch::Receiver<bool>>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            result = stop_rx.changed() => {
                if result.is_err() || *stop_rx.borrow() {
                    debug!("expiry sweeper received stop signal");
                    return;
                }
            }
            _ = external_shutdown(&mut shutdown) => {
                debug!("expiry sweeper received shutdown signal");
                return;
            }
            _ = ticker.tick() => {}
        }

        match shared.evict_expired().await {
            Ok(0) => trace!("nothing to expire"),
            Ok(evicted) => debug!(evicted, "expired records removed"),
            Err(e) => error!("expiry pass failed: {}", e),
        }
    }
}

/// Resolves once the injected signal turns `true`. A dropped sender never resolves.
async fn external_shutdown(shutdown: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = shutdown else {
        return std::future::pending().await;
    };

    loop {
        let stop = *rx.borrow_and_update();
        if stop {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}
