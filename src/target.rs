//! Target application resolution
//!
//! Looking up an application and obtaining a one-time passcode happens
//! outside this crate; [`TargetResolver`] is the seam it is consumed through.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Lifecycle state an application must be in to accept SSH sessions
pub const STARTED_STATE: &str = "STARTED";

/// Everything needed to reach one application instance
#[derive(Debug, Clone, Default)]
pub struct TargetInfo {
    /// Application GUID, part of the SSH username
    pub guid: String,

    /// Current lifecycle state, e.g. `STARTED` or `STOPPED`
    pub state: String,

    /// Whether the application's runtime accepts SSH sessions
    pub ssh_supported: bool,

    /// SSH endpoint as `host:port`
    pub endpoint: String,

    /// Host key fingerprint advertised for the endpoint (may be empty)
    pub endpoint_fingerprint: String,

    /// One-time passcode used as the SSH password
    pub passcode: String,
}

impl TargetInfo {
    /// Check that the application can take an SSH session right now
    pub fn validate(&self, app_name: &str) -> Result<()> {
        if !self.state.eq_ignore_ascii_case(STARTED_STATE) {
            return Err(Error::NotStarted(app_name.to_string()));
        }

        if !self.ssh_supported {
            return Err(Error::SshNotSupported(app_name.to_string()));
        }

        Ok(())
    }
}

/// Source of connection parameters for an application instance
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve(&self, app_name: &str, instance_index: u32) -> Result<TargetInfo>;
}

/// Resolver that hands out fixed, pre-resolved parameters
#[derive(Debug, Clone)]
pub struct StaticTarget(pub TargetInfo);

#[async_trait]
impl TargetResolver for StaticTarget {
    async fn resolve(&self, _app_name: &str, _instance_index: u32) -> Result<TargetInfo> {
        Ok(self.0.clone())
    }
}
