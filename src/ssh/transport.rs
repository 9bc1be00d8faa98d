//! SSH transport
//!
//! [`SecureDialer`], [`SecureClient`] and [`SecureSession`] are the seams the
//! session orchestrator is written against. The `Russh*` types implement them
//! on top of a `russh` client connection.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect, Pty};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::fingerprint::HostKeyPolicy;
use super::handler::{ConnectionEnd, SshHandler};
use crate::config::CONNECTION_TIMEOUT_SECS;
use crate::error::{Error, Result};
use crate::terminal::{BoxedReader, BoxedWriter, WindowSize};

/// Buffer size of the in-process pipes between a session channel and its caller
const PIPE_BUFFER_SIZE: usize = 32 * 1024;

/// Bidirectional byte stream (local connection or tunnel)
pub trait StreamIo: AsyncRead + AsyncWrite + Send {}

impl<T: AsyncRead + AsyncWrite + Send> StreamIo for T {}

/// Boxed bidirectional byte stream
pub type BoxedStream = Pin<Box<dyn StreamIo>>;

/// Terminal modes requested with every PTY
pub fn default_terminal_modes() -> Vec<(Pty, u32)> {
    vec![
        (Pty::ECHO, 1),
        (Pty::TTY_OP_ISPEED, 115_200),
        (Pty::TTY_OP_OSPEED, 115_200),
    ]
}

/// Parameters for opening the transport connection
#[derive(Debug, Clone)]
pub struct DialConfig {
    /// SSH username
    pub user: String,

    /// One-time passcode, the only authentication method offered
    pub password: String,

    /// Host key trust decision
    pub host_key_policy: HostKeyPolicy,
}

/// Opens authenticated transport connections
#[async_trait]
pub trait SecureDialer: Send + Sync {
    async fn dial(&self, address: &str, config: DialConfig) -> Result<Arc<dyn SecureClient>>;
}

/// An established transport connection, shared by every session and tunnel
#[async_trait]
pub trait SecureClient: Send + Sync {
    /// Open a session channel
    async fn new_session(&self) -> Result<Box<dyn SecureSession>>;

    /// Open a direct-tcpip stream to `address` (`host:port`) on the remote side
    async fn dial(&self, address: &str) -> Result<BoxedStream>;

    /// Send one liveness probe
    async fn send_keepalive(&self) -> Result<()>;

    /// Block until the connection terminates
    async fn wait(&self) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// A session channel running one remote shell or command
#[async_trait]
pub trait SecureSession: Send {
    async fn request_pty(
        &mut self,
        term: &str,
        size: WindowSize,
        modes: &[(Pty, u32)],
    ) -> Result<()>;

    /// Sender for window-change requests; usable while the session runs
    fn resize_sender(&self) -> mpsc::UnboundedSender<WindowSize>;

    fn stdin_pipe(&mut self) -> Result<BoxedWriter>;

    fn stdout_pipe(&mut self) -> Result<BoxedReader>;

    fn stderr_pipe(&mut self) -> Result<BoxedReader>;

    /// Run `command` remotely
    async fn start(&mut self, command: &str) -> Result<()>;

    /// Start a login shell
    async fn shell(&mut self) -> Result<()>;

    /// Wait for the remote command to exit
    async fn wait(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Split `host:port`, stripping brackets from IPv6 hosts
pub fn split_host_port(address: &str) -> Result<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::connection(format!("missing port in address {:?}", address)))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::connection(format!("invalid port in address {:?}", address)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok((host.to_string(), port))
}

/// Dialer backed by russh
#[derive(Clone)]
pub struct RusshDialer {
    config: Arc<client::Config>,
}

impl RusshDialer {
    pub fn new() -> Self {
        Self {
            config: Arc::new(client::Config::default()),
        }
    }
}

impl Default for RusshDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureDialer for RusshDialer {
    async fn dial(&self, address: &str, config: DialConfig) -> Result<Arc<dyn SecureClient>> {
        info!("Connecting to SSH endpoint {}...", address);

        let (handler, end) = SshHandler::new(config.host_key_policy);
        let connect_result = timeout(
            Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            client::connect(Arc::clone(&self.config), address, handler),
        )
        .await;

        let mut handle = match connect_result {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                error!("SSH connection failed: {}", e);
                return Err(e);
            }
            Err(_) => {
                error!("SSH connection timeout after {}s", CONNECTION_TIMEOUT_SECS);
                return Err(Error::connection(format!(
                    "Connection timeout after {}s",
                    CONNECTION_TIMEOUT_SECS
                )));
            }
        };

        debug!("Attempting passcode authentication for '{}'", config.user);
        let auth_result = handle
            .authenticate_password(&config.user, &config.password)
            .await?;
        if !auth_result.success() {
            return Err(Error::UnableToAuthenticate(
                "passcode authentication rejected".to_string(),
            ));
        }

        info!("Connected to {} as {}", address, config.user);
        Ok(Arc::new(RusshClient { handle, end }))
    }
}

/// Transport connection backed by a russh client handle
pub struct RusshClient {
    handle: Handle<SshHandler>,
    end: ConnectionEnd,
}

#[async_trait]
impl SecureClient for RusshClient {
    async fn new_session(&self) -> Result<Box<dyn SecureSession>> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::SessionAllocation(e.to_string()))?;
        Ok(Box::new(RusshSession::new(channel)))
    }

    async fn dial(&self, address: &str) -> Result<BoxedStream> {
        let forward_dial = |reason: String| Error::ForwardDial {
            address: address.to_string(),
            reason,
        };

        let (host, port) = split_host_port(address).map_err(|e| forward_dial(e.to_string()))?;
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
            .await
            .map_err(|e| forward_dial(e.to_string()))?;
        Ok(Box::pin(channel.into_stream()))
    }

    async fn send_keepalive(&self) -> Result<()> {
        // russh sends keepalive@openssh.com; the cf CLI uses keepalive@cloudfoundry.org
        self.handle.send_keepalive(true).await?;
        Ok(())
    }

    async fn wait(&self) -> Result<()> {
        self.end.wait().await
    }

    async fn close(&self) -> Result<()> {
        if self.handle.is_closed() {
            return Ok(());
        }
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        info!("SSH connection closed");
        Ok(())
    }
}

/// Session channel backed by russh
///
/// Until the remote command starts the channel is driven directly. After
/// that a pump task owns it and shuttles bytes between the channel and the
/// in-process pipes handed out by `stdin_pipe` / `stdout_pipe` / `stderr_pipe`.
pub struct RusshSession {
    channel: Option<Channel<Msg>>,
    pipes: Option<PumpPipes>,
    stdin: Option<DuplexStream>,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    resize_tx: mpsc::UnboundedSender<WindowSize>,
    resize_rx: Option<mpsc::UnboundedReceiver<WindowSize>>,
    pump: Option<JoinHandle<Result<()>>>,
}

/// The channel-side ends of the session pipes
struct PumpPipes {
    stdin: DuplexStream,
    stdout: DuplexStream,
    stderr: DuplexStream,
}

impl RusshSession {
    fn new(channel: Channel<Msg>) -> Self {
        let (stdin, pump_stdin) = tokio::io::duplex(PIPE_BUFFER_SIZE);
        let (stdout, pump_stdout) = tokio::io::duplex(PIPE_BUFFER_SIZE);
        let (stderr, pump_stderr) = tokio::io::duplex(PIPE_BUFFER_SIZE);
        let (resize_tx, resize_rx) = mpsc::unbounded_channel();

        Self {
            channel: Some(channel),
            pipes: Some(PumpPipes {
                stdin: pump_stdin,
                stdout: pump_stdout,
                stderr: pump_stderr,
            }),
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr: Some(stderr),
            resize_tx,
            resize_rx: Some(resize_rx),
            pump: None,
        }
    }

    fn channel(&self) -> Result<&Channel<Msg>> {
        self.channel
            .as_ref()
            .ok_or_else(|| Error::connection("session already started"))
    }

    fn start_pump(&mut self) -> Result<()> {
        let channel = self
            .channel
            .take()
            .ok_or_else(|| Error::connection("session already started"))?;
        let pipes = self
            .pipes
            .take()
            .ok_or_else(|| Error::connection("session already started"))?;
        let resize_rx = self
            .resize_rx
            .take()
            .ok_or_else(|| Error::connection("session already started"))?;

        self.pump = Some(tokio::spawn(pump_channel(channel, pipes, resize_rx)));
        Ok(())
    }
}

fn take_pipe(pipe: &mut Option<DuplexStream>, name: &str) -> Result<DuplexStream> {
    pipe.take()
        .ok_or_else(|| Error::connection(format!("{} pipe already taken", name)))
}

#[async_trait]
impl SecureSession for RusshSession {
    async fn request_pty(
        &mut self,
        term: &str,
        size: WindowSize,
        modes: &[(Pty, u32)],
    ) -> Result<()> {
        self.channel()?
            .request_pty(true, term, size.width, size.height, 0, 0, modes)
            .await?;
        Ok(())
    }

    fn resize_sender(&self) -> mpsc::UnboundedSender<WindowSize> {
        self.resize_tx.clone()
    }

    fn stdin_pipe(&mut self) -> Result<BoxedWriter> {
        Ok(Box::new(take_pipe(&mut self.stdin, "stdin")?))
    }

    fn stdout_pipe(&mut self) -> Result<BoxedReader> {
        Ok(Box::new(take_pipe(&mut self.stdout, "stdout")?))
    }

    fn stderr_pipe(&mut self) -> Result<BoxedReader> {
        Ok(Box::new(take_pipe(&mut self.stderr, "stderr")?))
    }

    async fn start(&mut self, command: &str) -> Result<()> {
        self.channel()?.exec(true, command).await?;
        self.start_pump()
    }

    async fn shell(&mut self) -> Result<()> {
        self.channel()?.request_shell(true).await?;
        self.start_pump()
    }

    async fn wait(&mut self) -> Result<()> {
        match self.pump.take() {
            Some(pump) => pump
                .await
                .map_err(|e| Error::connection(format!("session task failed: {}", e)))?,
            None => Err(Error::connection("session not started")),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(channel) = self.channel.take() {
            channel.close().await?;
        }
        Ok(())
    }
}

/// Drive a started session channel until the remote side closes it
async fn pump_channel(
    mut channel: Channel<Msg>,
    pipes: PumpPipes,
    mut resize_rx: mpsc::UnboundedReceiver<WindowSize>,
) -> Result<()> {
    let PumpPipes {
        mut stdin,
        mut stdout,
        mut stderr,
    } = pipes;

    let mut buf = vec![0u8; PIPE_BUFFER_SIZE];
    let mut stdin_open = true;
    let mut resize_open = true;
    let mut exit: Option<Result<()>> = None;

    loop {
        tokio::select! {
            read = stdin.read(&mut buf), if stdin_open => {
                match read {
                    Ok(0) | Err(_) => {
                        stdin_open = false;
                        let _ = channel.eof().await;
                    }
                    Ok(n) => {
                        if let Err(e) = channel.data(&buf[..n]).await {
                            debug!("Channel data error: {}", e);
                            stdin_open = false;
                        }
                    }
                }
            }

            size = resize_rx.recv(), if resize_open => {
                match size {
                    Some(size) => {
                        if let Err(e) = channel.window_change(size.width, size.height, 0, 0).await {
                            debug!("Window change failed: {}", e);
                        }
                    }
                    None => resize_open = false,
                }
            }

            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { ref data }) => {
                        if let Err(e) = stdout.write_all(data).await {
                            debug!("Local stdout pipe closed: {}", e);
                        }
                    }
                    Some(ChannelMsg::ExtendedData { ref data, ext: 1 }) => {
                        if let Err(e) = stderr.write_all(data).await {
                            debug!("Local stderr pipe closed: {}", e);
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        debug!("Remote command exited with status {}", exit_status);
                        exit = Some(if exit_status == 0 {
                            Ok(())
                        } else {
                            Err(Error::ExitStatus(exit_status))
                        });
                    }
                    Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                        exit = Some(Err(Error::ExitSignal(format!("{:?}", signal_name))));
                    }
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
        }
    }

    // Dropping the write ends gives the local copies their EOF
    drop(stdout);
    drop(stderr);

    exit.unwrap_or(Err(Error::ChannelClosed))
}
