//! Connection keepalive
//!
//! Sends a liveness probe over the transport every interval until stopped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::transport::SecureClient;

/// Running keepalive task
///
/// Stopped by [`KeepAlive::stop`], or when dropped.
pub struct KeepAlive {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl KeepAlive {
    /// Start probing `client` every `interval`; the first probe goes out
    /// one interval from now
    pub fn spawn(client: Arc<dyn SecureClient>, interval: Duration) -> Self {
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_keepalive(client, interval, stop_rx));
        Self {
            stop: Some(stop),
            task: Some(task),
        }
    }

    /// Stop probing and wait for the task to finish
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn run_keepalive(
    client: Arc<dyn SecureClient>,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = client.send_keepalive().await {
                    debug!("Keepalive failed: {}", e);
                }
            }
            _ = &mut stop => break,
        }
    }

    debug!("Keepalive stopped");
}
