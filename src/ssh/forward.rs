//! Local port forwarding
//!
//! Each forward spec gets a local listener and an accept loop. Every accepted
//! connection is tunneled to the spec's remote address through the shared
//! transport connection, with bytes copied in both directions until each side
//! has finished.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::transport::{BoxedStream, SecureClient};

/// Pause before accepting again after a temporary accept error
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Opens local listeners
#[async_trait]
pub trait ListenerFactory: Send + Sync {
    async fn listen(&self, address: &str) -> io::Result<Box<dyn LocalListener>>;
}

/// A listening local socket; dropping it closes it
#[async_trait]
pub trait LocalListener: Send {
    async fn accept(&mut self) -> io::Result<(BoxedStream, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Listener factory for TCP sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpListenerFactory;

#[async_trait]
impl ListenerFactory for TcpListenerFactory {
    async fn listen(&self, address: &str) -> io::Result<Box<dyn LocalListener>> {
        let listener = TcpListener::bind(address).await?;
        Ok(Box::new(TcpLocalListener(listener)))
    }
}

struct TcpLocalListener(TcpListener);

#[async_trait]
impl LocalListener for TcpLocalListener {
    async fn accept(&mut self) -> io::Result<(BoxedStream, SocketAddr)> {
        let (stream, peer) = self.0.accept().await?;
        Ok((Box::pin(stream), peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }
}

/// Handle to a running accept loop
///
/// Closing (or dropping) the handle stops the loop, which drops the listener.
#[derive(Debug)]
pub struct ForwardListener {
    local_addr: Option<SocketAddr>,
    stop: Option<oneshot::Sender<()>>,
}

impl ForwardListener {
    /// Address the listener is bound to, when known
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Signal the accept loop to stop
    pub fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for ForwardListener {
    fn drop(&mut self) {
        self.close();
    }
}

/// Start forwarding connections accepted on `listener` to `connect_address`
pub fn spawn_forward(
    listener: Box<dyn LocalListener>,
    client: Arc<dyn SecureClient>,
    connect_address: String,
) -> ForwardListener {
    let local_addr = listener.local_addr().ok();
    let (stop, stop_rx) = oneshot::channel();

    tokio::spawn(accept_loop(listener, client, connect_address, stop_rx));

    ForwardListener {
        local_addr,
        stop: Some(stop),
    }
}

async fn accept_loop(
    mut listener: Box<dyn LocalListener>,
    client: Arc<dyn SecureClient>,
    connect_address: String,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = &mut stop => break,
        };

        match accepted {
            Ok((conn, peer)) => {
                debug!("Accepted forward connection from {} for {}", peer, connect_address);
                tokio::spawn(handle_forward_connection(
                    conn,
                    Arc::clone(&client),
                    connect_address.clone(),
                ));
            }
            Err(e) if is_temporary(&e) => {
                debug!("Temporary accept error, retrying: {}", e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
            Err(e) => {
                debug!("Accept loop for {} ended: {}", connect_address, e);
                break;
            }
        }
    }

    info!("Stopped forwarding to {}", connect_address);
}

/// Whether an accept error is worth retrying
fn is_temporary(err: &io::Error) -> bool {
    // EMFILE and ENFILE: out of file descriptors
    const TOO_MANY_OPEN_FILES: [i32; 2] = [24, 23];

    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::OutOfMemory
    ) || err
        .raw_os_error()
        .is_some_and(|code| cfg!(unix) && TOO_MANY_OPEN_FILES.contains(&code))
}

/// Tunnel one local connection to `target_address`
async fn handle_forward_connection(
    conn: BoxedStream,
    client: Arc<dyn SecureClient>,
    target_address: String,
) {
    let target = match client.dial(&target_address).await {
        Ok(target) => target,
        Err(e) => {
            warn!("{}", e);
            return;
        }
    };

    let (conn_reader, conn_writer) = tokio::io::split(conn);
    let (target_reader, target_writer) = tokio::io::split(target);

    let (sent, received) = tokio::join!(
        copy_and_close(conn_reader, target_writer),
        copy_and_close(target_reader, conn_writer),
    );

    debug!(
        "Forward connection to {} finished ({} bytes sent, {} bytes received)",
        target_address, sent, received
    );
}

/// Copy until `src` is exhausted, then shut down the write side of `dest`
pub(crate) async fn copy_and_close<R, W>(mut src: R, mut dest: W) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = tokio::io::copy(&mut src, &mut dest).await.unwrap_or(0);
    let _ = dest.shutdown().await;
    copied
}
