//! app-ssh - SSH sessions to application instances
//!
//! This crate opens a single authenticated SSH connection to one instance of
//! an application and multiplexes an interactive shell or remote command and
//! any number of local port forwards over it.
//!
//! # Features
//!
//! - Host key verification against MD5, SHA-1 or SHA-256 fingerprints
//! - One-time passcode authentication as `cf:<app-guid>/<index>`
//! - Local port forwarding (`-L`) with half-close aware tunnels
//! - PTY allocation with live window resize propagation
//! - Keepalive probes for long-lived sessions
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! app-ssh --app my-app --app-guid 0b0c.. --endpoint ssh.example.com:2222 \
//!   --fingerprint a6:d1:08:.. --passcode abc123 -L 9000:localhost:8080 -N
//! ```

pub mod config;
pub mod error;
pub mod ssh;
pub mod target;
pub mod terminal;

// Re-exports for convenience
pub use config::{Args, Config};
pub use error::{Error, Result};
pub use ssh::{
    ForwardSpec, HostKeyPolicy, RusshDialer, SecureShell, SessionOptions, TerminalRequest,
};
pub use target::{StaticTarget, TargetInfo, TargetResolver};
pub use terminal::{StdTerminal, TerminalHelper, WindowSize};
