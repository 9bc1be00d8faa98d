//! Error types for the SSH session engine

use thiserror::Error;

/// Main error type for the SSH session engine
#[derive(Debug, Error)]
pub enum Error {
    /// Target application is not running
    #[error("Application {0:?} is not in the STARTED state")]
    NotStarted(String),

    /// Target application cannot accept SSH sessions
    #[error("Application {0:?} does not support remote execution")]
    SshNotSupported(String),

    /// No fingerprint on file for the endpoint
    #[error("Unable to verify identity of host.\n\nThe fingerprint of the received key was {0:?}.")]
    UnknownHostKey(String),

    /// Presented host key does not match the expected fingerprint
    #[error("Host key verification failed.\n\nThe fingerprint of the received key was {0:?}.")]
    HostKeyMismatch(String),

    /// Expected fingerprint is in none of the known formats
    #[error("Unsupported host key fingerprint format")]
    UnsupportedFingerprint,

    /// SSH connection failed
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// One-time passcode was rejected
    #[error("Error opening SSH connection: you are not authorized to perform the requested action ({0})")]
    UnableToAuthenticate(String),

    /// Session channel could not be opened
    #[error("SSH session allocation failed: {0}")]
    SessionAllocation(String),

    /// Remote command exited non-zero
    #[error("Remote command exited with status {0}")]
    ExitStatus(u32),

    /// Remote command was killed by a signal
    #[error("Remote command terminated by signal {0}")]
    ExitSignal(String),

    /// Session channel closed without an exit status
    #[error("SSH channel closed without an exit status")]
    ChannelClosed,

    /// Tunnel dial through the transport failed
    #[error("connect to {address} failed: {reason}")]
    ForwardDial { address: String, reason: String },

    /// Malformed `-L` argument
    #[error("{0}")]
    InvalidForwardSpec(String),

    /// Operation requires a connected session
    #[error("SSH session is not connected")]
    NotConnected,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// SSH key encoding error
    #[error("SSH key error: {0}")]
    SshKey(String),

    /// SSH protocol error
    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        Error::Connection(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a forward spec parse error from a string
    pub fn invalid_forward_spec(msg: impl Into<String>) -> Self {
        Error::InvalidForwardSpec(msg.into())
    }

    /// Process exit code to report for this error.
    ///
    /// A remote exit status is passed through; everything else is a local failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ExitStatus(status) => i32::try_from(*status).unwrap_or(255),
            Error::ExitSignal(_) => 255,
            _ => 1,
        }
    }
}
