//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait: host key verification goes
//! through [`HostKeyPolicy`], and the end of the connection is published on a
//! watch channel so callers can block until the transport terminates and
//! learn why it did.

use std::sync::{Arc, Mutex, PoisonError};

use russh::client::DisconnectReason;
use russh::keys::PublicKey;
use russh::Disconnect;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::fingerprint::HostKeyPolicy;
use crate::error::Error;

/// Observer for the end of a connection
#[derive(Debug, Clone)]
pub struct ConnectionEnd {
    closed: watch::Receiver<bool>,
    failure: Arc<Mutex<Option<Error>>>,
}

impl ConnectionEnd {
    /// Block until the connection is gone
    ///
    /// Returns the error that ended it, if it did not end cleanly. The error
    /// is handed out once; later calls return `Ok(())`.
    pub async fn wait(&self) -> Result<(), Error> {
        let mut closed = self.closed.clone();
        // A dropped sender means the handler is gone, which is also a close
        let _ = closed.wait_for(|closed| *closed).await;

        let failure = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        failure.map_or(Ok(()), Err)
    }
}

/// SSH client handler for russh
///
/// russh owns the handler for the lifetime of the connection and drops it
/// when the connection ends; that drop is what flips the `closed` flag.
#[derive(Debug)]
pub struct SshHandler {
    policy: HostKeyPolicy,
    closed: watch::Sender<bool>,
    failure: Arc<Mutex<Option<Error>>>,
}

impl SshHandler {
    /// Create a handler and the observer for the connection's end
    pub fn new(policy: HostKeyPolicy) -> (Self, ConnectionEnd) {
        let (closed, closed_rx) = watch::channel(false);
        let failure = Arc::new(Mutex::new(None));
        let end = ConnectionEnd {
            closed: closed_rx,
            failure: Arc::clone(&failure),
        };
        (
            Self {
                policy,
                closed,
                failure,
            },
            end,
        )
    }

    fn record_failure(&self, error: Error) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }
}

impl Drop for SshHandler {
    fn drop(&mut self) {
        self.closed.send_replace(true);
    }
}

impl russh::client::Handler for SshHandler {
    type Error = Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Error> {
        match self.policy.verify(server_public_key) {
            Ok(()) => {
                debug!("Host key accepted");
                Ok(true)
            }
            Err(e) => {
                warn!("Host key rejected: {}", e);
                Err(e)
            }
        }
    }

    /// A local close or a server EOF both surface as `russh::Error::Disconnect`
    async fn disconnected(&mut self, reason: DisconnectReason<Error>) -> Result<(), Error> {
        match reason {
            DisconnectReason::ReceivedDisconnect(info) => {
                if matches!(info.reason_code, Disconnect::ByApplication) {
                    debug!("Server closed the connection");
                } else {
                    warn!("Server disconnected: {:?} {}", info.reason_code, info.message);
                    self.record_failure(Error::connection(format!(
                        "disconnected by server ({:?}): {}",
                        info.reason_code, info.message
                    )));
                }
                Ok(())
            }
            DisconnectReason::Error(Error::Protocol(russh::Error::Disconnect)) => {
                debug!("Connection closed");
                Ok(())
            }
            DisconnectReason::Error(e) => {
                warn!("Connection lost: {}", e);
                self.record_failure(e);
                Err(Error::Protocol(russh::Error::Disconnect))
            }
        }
    }
}
