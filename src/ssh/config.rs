//! Session options
//!
//! What the caller asked for: which instance, which command, whether to
//! allocate a terminal and which local ports to forward.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Terminal allocation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminalRequest {
    /// Allocate only for an interactive shell on a terminal
    #[default]
    Auto,
    /// Never allocate (`-T`)
    No,
    /// Allocate when stdin is a terminal (`-t`)
    Yes,
    /// Always allocate (`-tt`)
    Force,
}

/// One local-to-remote tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    /// Local `host:port` to listen on
    pub listen_address: String,

    /// Remote `host:port` to connect to through the SSH connection
    pub connect_address: String,
}

impl ForwardSpec {
    pub fn new(listen_address: impl Into<String>, connect_address: impl Into<String>) -> Self {
        Self {
            listen_address: listen_address.into(),
            connect_address: connect_address.into(),
        }
    }
}

impl fmt::Display for ForwardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.listen_address, self.connect_address)
    }
}

/// Parses `[bind_address:]port:host:hostport`
///
/// A missing bind address means `localhost`; `*` or an empty bind address
/// means all interfaces (`0.0.0.0`). IPv6 addresses are written in brackets.
impl FromStr for ForwardSpec {
    type Err = Error;

    fn from_str(arg: &str) -> Result<Self> {
        let tokens = tokenize_forward_spec(arg)?;

        let (bind, port, host, host_port) = match tokens.as_slice() {
            [port, host, host_port] => ("localhost", *port, *host, *host_port),
            [bind, port, host, host_port] => (*bind, *port, *host, *host_port),
            _ => return Err(unparsable(arg)),
        };

        if port.parse::<u16>().is_err() || host_port.parse::<u16>().is_err() || host.is_empty() {
            return Err(unparsable(arg));
        }

        let bind = match bind {
            "" | "*" => ALL_INTERFACES,
            bind => bind,
        };

        Ok(ForwardSpec::new(
            format!("{}:{}", bind, port),
            format!("{}:{}", host, host_port),
        ))
    }
}

/// Bind address for a wildcard `-L` bind
const ALL_INTERFACES: &str = "0.0.0.0";

fn unparsable(arg: &str) -> Error {
    Error::invalid_forward_spec(format!(
        "Unable to parse local forwarding argument: {:?}",
        arg
    ))
}

/// Split on `:` while keeping bracketed IPv6 addresses whole
fn tokenize_forward_spec(arg: &str) -> Result<Vec<&str>> {
    let mut tokens = Vec::new();
    let mut rest = arg;

    loop {
        if rest.starts_with('[') {
            let end = rest.find(']').ok_or_else(|| {
                Error::invalid_forward_spec(format!(
                    "Argument missing closing bracket: {:?}",
                    rest
                ))
            })?;
            tokens.push(&rest[..=end]);
            rest = &rest[end + 1..];

            if rest.is_empty() {
                break;
            }
            match rest.strip_prefix(':') {
                Some(next) => rest = next,
                None => {
                    return Err(Error::invalid_forward_spec(format!(
                        "Unexpected token: {:?}",
                        rest
                    )))
                }
            }
        } else {
            match rest.split_once(':') {
                Some((token, next)) => {
                    tokens.push(token);
                    rest = next;
                }
                None => {
                    tokens.push(rest);
                    break;
                }
            }
        }
    }

    Ok(tokens)
}

/// Options for one SSH session
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Application name, used in user-facing errors
    pub app_name: String,

    /// Application instance to connect to
    pub instance_index: u32,

    /// Remote command tokens; empty starts a login shell
    pub command: Vec<String>,

    /// Terminal allocation policy
    pub terminal_request: TerminalRequest,

    /// Only forward ports, do not run anything remotely (`-N`)
    pub skip_remote_execution: bool,

    /// Accept any host key (`-k`)
    pub skip_host_validation: bool,

    /// Local port forwards (`-L`)
    pub forward_specs: Vec<ForwardSpec>,
}

impl SessionOptions {
    /// Create options for an interactive shell on instance 0
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    pub fn with_instance_index(mut self, index: u32) -> Self {
        self.instance_index = index;
        self
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_terminal_request(mut self, request: TerminalRequest) -> Self {
        self.terminal_request = request;
        self
    }

    pub fn with_skip_remote_execution(mut self, skip: bool) -> Self {
        self.skip_remote_execution = skip;
        self
    }

    pub fn with_skip_host_validation(mut self, skip: bool) -> Self {
        self.skip_host_validation = skip;
        self
    }

    pub fn with_forward(mut self, spec: ForwardSpec) -> Self {
        self.forward_specs.push(spec);
        self
    }
}
