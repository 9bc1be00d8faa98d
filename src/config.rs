//! Configuration and CLI argument parsing for app-ssh

use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::error::{Error, Result};
use crate::ssh::config::{ForwardSpec, SessionOptions, TerminalRequest};
use crate::target::{TargetInfo, STARTED_STATE};

/// Interval between keepalive probes
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Connection timeout in seconds
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Terminal type requested when `TERM` is unset
pub const DEFAULT_TERMINAL_TYPE: &str = "xterm";

/// First component of the SSH username, `cf:<guid>/<index>`
pub const SSH_USERNAME_PREFIX: &str = "cf";

/// app-ssh CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "app-ssh")]
#[command(version)]
#[command(about = "SSH to an application instance, optionally forwarding local ports")]
pub struct Args {
    /// Application name
    #[arg(long = "app", env = "APP_SSH_APP")]
    pub app_name: String,

    /// Application GUID
    #[arg(long, env = "APP_SSH_APP_GUID")]
    pub app_guid: String,

    /// Application lifecycle state
    #[arg(long, default_value = STARTED_STATE, env = "APP_SSH_APP_STATE")]
    pub app_state: String,

    /// SSH endpoint as host:port
    #[arg(long, env = "APP_SSH_ENDPOINT")]
    pub endpoint: String,

    /// Expected host key fingerprint (MD5, SHA-1 or SHA-256)
    #[arg(long, default_value = "", env = "APP_SSH_FINGERPRINT")]
    pub fingerprint: String,

    /// One-time SSH passcode
    #[arg(long, env = "APP_SSH_PASSCODE", hide_env_values = true)]
    pub passcode: String,

    /// Application instance index
    #[arg(short = 'i', long = "index", default_value_t = 0)]
    pub index: u32,

    /// Local port forward, [bind_address:]port:host:hostport
    #[arg(short = 'L', value_name = "SPEC")]
    pub forward: Vec<String>,

    /// Do not execute a remote command
    #[arg(short = 'N')]
    pub skip_remote_execution: bool,

    /// Skip host key validation
    #[arg(short = 'k')]
    pub skip_host_validation: bool,

    /// Request a pseudo-tty; repeat to force one without a local tty
    #[arg(short = 't', action = ArgAction::Count)]
    pub request_pseudo_tty: u8,

    /// Disable pseudo-tty allocation
    #[arg(short = 'T')]
    pub disable_pseudo_tty: bool,

    /// Keepalive interval in seconds
    #[arg(long, default_value_t = DEFAULT_KEEPALIVE_INTERVAL.as_secs(), env = "APP_SSH_KEEPALIVE")]
    pub keepalive: u64,

    /// Remote command and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection parameters for the instance
    pub target: TargetInfo,

    /// What to do once connected
    pub options: SessionOptions,

    /// Keepalive interval
    pub keepalive_interval: Duration,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let forward_specs = args
            .forward
            .iter()
            .map(|spec| spec.parse::<ForwardSpec>())
            .collect::<Result<Vec<_>>>()?;

        let terminal_request = terminal_request(args.request_pseudo_tty, args.disable_pseudo_tty);

        let mut options = SessionOptions::new(args.app_name)
            .with_instance_index(args.index)
            .with_command(args.command)
            .with_terminal_request(terminal_request)
            .with_skip_remote_execution(args.skip_remote_execution)
            .with_skip_host_validation(args.skip_host_validation);
        for spec in forward_specs {
            options = options.with_forward(spec);
        }

        Ok(Config {
            target: TargetInfo {
                guid: args.app_guid,
                state: args.app_state,
                ssh_supported: true,
                endpoint: args.endpoint,
                endpoint_fingerprint: args.fingerprint,
                passcode: args.passcode,
            },
            options,
            keepalive_interval: Duration::from_secs(args.keepalive),
        })
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.app_name.is_empty() {
        errors.push("Missing required --app".to_string());
    }

    if args.app_guid.is_empty() {
        errors.push("Missing required --app-guid".to_string());
    }

    if args.endpoint.is_empty() {
        errors.push("Missing required --endpoint".to_string());
    } else if !args.endpoint.contains(':') {
        errors.push(format!("Endpoint must be host:port: {}", args.endpoint));
    }

    if args.keepalive == 0 {
        errors.push("Keepalive interval must be at least 1 second".to_string());
    }

    if args.skip_remote_execution && !args.command.is_empty() {
        errors.push("Cannot run a command with -N".to_string());
    }

    if !errors.is_empty() {
        return Err(Error::config(errors.join("\n")));
    }

    Ok(())
}

/// Terminal request from the `-t` count and `-T`
///
/// `-T` wins over any number of `-t`.
pub fn terminal_request(request_count: u8, disable: bool) -> TerminalRequest {
    match (disable, request_count) {
        (true, _) => TerminalRequest::No,
        (false, 0) => TerminalRequest::Auto,
        (false, 1) => TerminalRequest::Yes,
        (false, _) => TerminalRequest::Force,
    }
}

/// Terminal type for PTY requests, from the value of `TERM`
pub fn terminal_type(term: Option<String>) -> String {
    term.filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TERMINAL_TYPE.to_string())
}
