//! SSH session engine
//!
//! This module provides the transport connection to an application
//! instance, host key verification, port forwarding, and interactive
//! shell/command sessions with PTY and resize support.

pub mod config;
pub mod connection;
pub mod fingerprint;
pub mod forward;
pub mod handler;
pub mod interactive;
pub mod keepalive;
pub mod resize;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use config::{ForwardSpec, SessionOptions, TerminalRequest};
pub use connection::{ssh_username, SecureShell};
pub use fingerprint::{fingerprint, FingerprintFormat, HostKeyPolicy};
pub use forward::{ForwardListener, ListenerFactory, LocalListener, TcpListenerFactory};
pub use handler::{ConnectionEnd, SshHandler};
pub use interactive::{should_allocate_terminal, InteractiveSettings};
pub use keepalive::KeepAlive;
pub use transport::{
    BoxedStream, DialConfig, RusshDialer, SecureClient, SecureDialer, SecureSession,
};
