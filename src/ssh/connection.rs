//! SSH session orchestration
//!
//! [`SecureShell`] owns the single transport connection to an application
//! instance and the local listeners forwarding through it. A session is used
//! in order: `connect`, then `local_port_forward`, then either
//! `interactive_session` or `wait`, and finally `close`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::config::SessionOptions;
use super::fingerprint::HostKeyPolicy;
use super::forward::{spawn_forward, ForwardListener, ListenerFactory, TcpListenerFactory};
use super::interactive::{run_interactive_session, InteractiveSettings};
use super::keepalive::KeepAlive;
use super::transport::{DialConfig, SecureClient, SecureDialer};
use crate::config::{DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_TERMINAL_TYPE, SSH_USERNAME_PREFIX};
use crate::error::{Error, Result};
use crate::target::TargetResolver;
use crate::terminal::TerminalHelper;

/// SSH username for one application instance
pub fn ssh_username(app_guid: &str, instance_index: u32) -> String {
    format!("{}:{}/{}", SSH_USERNAME_PREFIX, app_guid, instance_index)
}

/// SSH session to one application instance
pub struct SecureShell {
    dialer: Arc<dyn SecureDialer>,
    resolver: Arc<dyn TargetResolver>,
    terminal: Arc<dyn TerminalHelper>,
    listener_factory: Arc<dyn ListenerFactory>,
    settings: InteractiveSettings,

    /// Established transport connection, `None` before connect and after close
    client: Option<Arc<dyn SecureClient>>,

    options: Option<SessionOptions>,

    /// Open forward listeners; only appended by `local_port_forward`, drained by `close`
    listeners: Vec<ForwardListener>,
}

impl SecureShell {
    /// Create an unconnected session
    ///
    /// Forwards listen on TCP sockets; PTYs are requested as
    /// [`DEFAULT_TERMINAL_TYPE`] and keepalives go out every
    /// [`DEFAULT_KEEPALIVE_INTERVAL`] unless overridden.
    pub fn new(
        dialer: Arc<dyn SecureDialer>,
        resolver: Arc<dyn TargetResolver>,
        terminal: Arc<dyn TerminalHelper>,
    ) -> Self {
        Self {
            dialer,
            resolver,
            terminal,
            listener_factory: Arc::new(TcpListenerFactory),
            settings: InteractiveSettings {
                terminal_type: DEFAULT_TERMINAL_TYPE.to_string(),
                keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            },
            client: None,
            options: None,
            listeners: Vec::new(),
        }
    }

    pub fn with_listener_factory(mut self, factory: Arc<dyn ListenerFactory>) -> Self {
        self.listener_factory = factory;
        self
    }

    /// Terminal type sent with PTY requests; empty keeps the default
    pub fn with_terminal_type(mut self, terminal_type: impl Into<String>) -> Self {
        let terminal_type = terminal_type.into();
        if !terminal_type.is_empty() {
            self.settings.terminal_type = terminal_type;
        }
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.settings.keepalive_interval = interval;
        self
    }

    /// Whether a transport connection is currently held
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Local addresses the forward listeners are bound to
    pub fn forward_addresses(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(ForwardListener::local_addr)
            .collect()
    }

    /// Resolve the target, check it can take a session, and dial it
    ///
    /// Nothing is dialed if the application is not started or does not
    /// support SSH.
    pub async fn connect(&mut self, options: SessionOptions) -> Result<()> {
        let target = self
            .resolver
            .resolve(&options.app_name, options.instance_index)
            .await?;
        target.validate(&options.app_name)?;

        let config = DialConfig {
            user: ssh_username(&target.guid, options.instance_index),
            password: target.passcode.clone(),
            host_key_policy: HostKeyPolicy::new(
                target.endpoint_fingerprint.clone(),
                options.skip_host_validation,
            ),
        };

        let client = self.dialer.dial(&target.endpoint, config).await?;
        info!(
            "Connected to {} instance {}",
            options.app_name, options.instance_index
        );

        self.client = Some(client);
        self.options = Some(options);
        Ok(())
    }

    fn connected(&self) -> Result<(&Arc<dyn SecureClient>, &SessionOptions)> {
        match (&self.client, &self.options) {
            (Some(client), Some(options)) => Ok((client, options)),
            _ => Err(Error::NotConnected),
        }
    }

    /// Open a listener for every forward spec and start forwarding
    ///
    /// Stops at the first listener that cannot be opened; listeners opened
    /// before it stay up until [`SecureShell::close`].
    pub async fn local_port_forward(&mut self) -> Result<()> {
        let (client, options) = self.connected()?;
        let client = Arc::clone(client);
        let specs = options.forward_specs.clone();

        for spec in specs {
            debug!("Listening on {} for {}", spec.listen_address, spec.connect_address);
            let listener = self
                .listener_factory
                .listen(&spec.listen_address)
                .await?;
            self.listeners.push(spawn_forward(
                listener,
                Arc::clone(&client),
                spec.connect_address,
            ));
        }

        Ok(())
    }

    /// Run the requested shell or command and wait for it to exit
    pub async fn interactive_session(&self) -> Result<()> {
        let (client, options) = self.connected()?;
        run_interactive_session(
            Arc::clone(client),
            Arc::clone(&self.terminal),
            options,
            &self.settings,
        )
        .await
    }

    /// Keep the connection alive until it terminates
    pub async fn wait(&self) -> Result<()> {
        let (client, _) = self.connected()?;
        let keepalive = KeepAlive::spawn(Arc::clone(client), self.settings.keepalive_interval);
        let result = client.wait().await;
        keepalive.stop().await;
        result
    }

    /// Stop every forward listener, then close the connection
    ///
    /// Safe to call repeatedly, and before or after a failed connect.
    pub async fn close(&mut self) -> Result<()> {
        for mut listener in self.listeners.drain(..) {
            listener.close();
        }

        match self.client.take() {
            Some(client) => client.close().await,
            None => Ok(()),
        }
    }
}
