//! Terminal resize propagation
//!
//! Watches for local window size changes and forwards each new size to the
//! remote PTY. On Unix the SIGWINCH signal drives it; elsewhere (or if the
//! signal cannot be registered) the size is polled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

use crate::terminal::{window_dimensions, TerminalHelper, WindowSize};

/// How often the window size is polled without a resize signal
pub const RESIZE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Source of "the window may have changed" notifications
pub enum ResizeEvents {
    #[cfg(unix)]
    Signal(tokio::signal::unix::Signal),
    Polling(Interval),
}

impl ResizeEvents {
    /// Native resize signal where the platform has one, polling otherwise
    pub fn for_platform() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::window_change()) {
                Ok(sigwinch) => return ResizeEvents::Signal(sigwinch),
                Err(e) => debug!("SIGWINCH unavailable, polling window size: {}", e),
            }
        }

        Self::polling(RESIZE_POLL_INTERVAL)
    }

    /// Fire every `period`, starting one period from now
    pub fn polling(period: Duration) -> Self {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ResizeEvents::Polling(ticker)
    }

    /// Wait for the next notification; `None` once the source is exhausted
    pub async fn recv(&mut self) -> Option<()> {
        match self {
            #[cfg(unix)]
            ResizeEvents::Signal(sigwinch) => sigwinch.recv().await,
            ResizeEvents::Polling(ticker) => {
                ticker.tick().await;
                Some(())
            }
        }
    }
}

/// Drops repeated reports of the same size
#[derive(Debug, Default)]
pub struct ResizeTracker {
    previous: Option<WindowSize>,
}

impl ResizeTracker {
    /// Start from the size the remote PTY already has
    pub fn starting_at(size: WindowSize) -> Self {
        Self {
            previous: Some(size),
        }
    }

    /// Returns the size if it differs from the last one sent
    pub fn observe(&mut self, size: WindowSize) -> Option<WindowSize> {
        if self.previous == Some(size) {
            return None;
        }
        self.previous = Some(size);
        Some(size)
    }
}

/// Forward window size changes to `resize_tx` until either side goes away
pub async fn watch_resize(
    mut events: ResizeEvents,
    terminal: Arc<dyn TerminalHelper>,
    initial: WindowSize,
    resize_tx: mpsc::UnboundedSender<WindowSize>,
) {
    let mut tracker = ResizeTracker::starting_at(initial);

    while events.recv().await.is_some() {
        let Some(size) = tracker.observe(window_dimensions(terminal.as_ref())) else {
            continue;
        };

        debug!("Window resized to {}x{}", size.width, size.height);
        if resize_tx.send(size).is_err() {
            break;
        }
    }
}
