//! Interactive session
//!
//! Runs one remote shell or command on a new session channel with the local
//! standard streams wired to it, an optional PTY kept in sync with the local
//! window size, and a keepalive for the duration of the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::config::{SessionOptions, TerminalRequest};
use super::forward::copy_and_close;
use super::keepalive::KeepAlive;
use super::resize::{watch_resize, ResizeEvents};
use super::transport::{default_terminal_modes, SecureClient, SecureSession};
use crate::error::Result;
use crate::terminal::{window_dimensions, StdStreams, TerminalHelper};

/// Settings for an interactive session that do not come from the user's options
#[derive(Debug, Clone)]
pub struct InteractiveSettings {
    /// Terminal type sent with the PTY request
    pub terminal_type: String,

    /// Keepalive interval while the session runs
    pub keepalive_interval: Duration,
}

/// Whether to request a remote PTY
///
/// `Auto` only allocates for an interactive shell; a remote command never
/// gets one unless it is asked for with `-t`/`-tt`.
pub fn should_allocate_terminal(
    request: TerminalRequest,
    command: &[String],
    stdin_is_terminal: bool,
) -> bool {
    match request {
        TerminalRequest::Force => true,
        TerminalRequest::No => false,
        TerminalRequest::Yes => stdin_is_terminal,
        TerminalRequest::Auto => command.is_empty() && stdin_is_terminal,
    }
}

/// Raw mode on the local terminal, restored on drop
struct RawModeGuard<'a> {
    terminal: &'a dyn TerminalHelper,
}

impl<'a> RawModeGuard<'a> {
    /// Switch to raw mode; `None` if the terminal refused
    fn acquire(terminal: &'a dyn TerminalHelper) -> Option<Self> {
        match terminal.set_raw_mode() {
            Ok(()) => Some(Self { terminal }),
            Err(e) => {
                debug!("Could not put terminal into raw mode: {}", e);
                None
            }
        }
    }
}

impl Drop for RawModeGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.terminal.restore_terminal() {
            warn!("Failed to restore terminal: {}", e);
        }
    }
}

/// Run a shell or command on `client` until it exits
///
/// Returns once the remote side has exited and everything it wrote has been
/// copied to the local stdout and stderr.
pub async fn run_interactive_session(
    client: Arc<dyn SecureClient>,
    terminal: Arc<dyn TerminalHelper>,
    options: &SessionOptions,
    settings: &InteractiveSettings,
) -> Result<()> {
    let mut session = client.new_session().await?;

    let result = drive_session(session.as_mut(), &client, &terminal, options, settings).await;

    if let Err(e) = session.close().await {
        debug!("Session close failed: {}", e);
    }

    result
}

async fn drive_session(
    session: &mut dyn SecureSession,
    client: &Arc<dyn SecureClient>,
    terminal: &Arc<dyn TerminalHelper>,
    options: &SessionOptions,
    settings: &InteractiveSettings,
) -> Result<()> {
    let StdStreams {
        stdin,
        stdout,
        stderr,
    } = terminal.std_streams();

    let in_pipe = session.stdin_pipe()?;
    let out_pipe = session.stdout_pipe()?;
    let err_pipe = session.stderr_pipe()?;

    let size = window_dimensions(terminal.as_ref());
    let allocate = should_allocate_terminal(
        options.terminal_request,
        &options.command,
        terminal.stdin_is_terminal(),
    );

    let _raw_mode = if allocate {
        debug!(
            "Requesting {} PTY of {}x{}",
            settings.terminal_type, size.width, size.height
        );
        session
            .request_pty(&settings.terminal_type, size, &default_terminal_modes())
            .await?;
        RawModeGuard::acquire(terminal.as_ref())
    } else {
        None
    };

    if options.command.is_empty() {
        session.shell().await?;
    } else {
        session.start(&options.command.join(" ")).await?;
    }

    // Not awaited: a blocked local read must not hold up the session's end
    tokio::spawn(copy_and_close(stdin, in_pipe));
    let stdout_copy = tokio::spawn(copy_and_flush(out_pipe, stdout));
    let stderr_copy = tokio::spawn(copy_and_flush(err_pipe, stderr));

    let resize_watcher = terminal.stdout_is_terminal().then(|| {
        tokio::spawn(watch_resize(
            ResizeEvents::for_platform(),
            Arc::clone(terminal),
            size,
            session.resize_sender(),
        ))
    });

    let keepalive = KeepAlive::spawn(Arc::clone(client), settings.keepalive_interval);

    let result = session.wait().await;

    let _ = stdout_copy.await;
    let _ = stderr_copy.await;

    keepalive.stop().await;
    if let Some(watcher) = resize_watcher {
        watcher.abort();
    }

    result
}

async fn copy_and_flush<R, W>(mut src: R, mut dest: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Err(e) = tokio::io::copy(&mut src, &mut dest).await {
        debug!("Output copy ended: {}", e);
    }
    let _ = dest.flush().await;
}
