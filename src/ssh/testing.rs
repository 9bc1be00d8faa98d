//! In-memory stand-ins for the transport, listeners and terminal

use std::collections::VecDeque;
use std::io::{self, Cursor};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use russh::keys::PublicKey;
use russh::Pty;
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::forward::{ListenerFactory, LocalListener};
use super::transport::{BoxedStream, DialConfig, SecureClient, SecureDialer, SecureSession};
use crate::error::{Error, Result};
use crate::terminal::{BoxedReader, BoxedWriter, StdStreams, TerminalHelper, WindowSize};

/// Host key presented by [`FakeDialer`]
pub const HOST_KEY: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAICcc8bcnxTqUxkSLHGDkiw/smFGOXqevZ6U1hMNaKdlF";
pub const HOST_KEY_MD5: &str = "11:88:cf:f1:7a:0e:33:b4:12:f2:60:8f:47:2b:22:4e";
pub const HOST_KEY_SHA256: &str = "q6YFXPqJQdjOCvFt8NR/oddGw7aieKDvv7plKeZTspk";

const FAKE_PIPE_SIZE: usize = 16 * 1024;

/// Byte sink that can be inspected after it has been handed out
#[derive(Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DialBehavior {
    Echo,
    Refuse,
}

/// Transport connection that echoes tunnels and hands out queued sessions
pub struct FakeClient {
    dial_behavior: DialBehavior,
    sessions: Mutex<VecDeque<FakeSession>>,
    keepalives: Mutex<Vec<Instant>>,
    dialed: Mutex<Vec<String>>,
    closes: AtomicUsize,
    closed: watch::Sender<bool>,
}

impl Default for FakeClient {
    fn default() -> Self {
        Self::echoing()
    }
}

impl FakeClient {
    /// Tunnels echo back whatever is written to them
    pub fn echoing() -> Self {
        Self::with_dial_behavior(DialBehavior::Echo)
    }

    /// Every tunnel dial fails
    pub fn refusing() -> Self {
        Self::with_dial_behavior(DialBehavior::Refuse)
    }

    fn with_dial_behavior(dial_behavior: DialBehavior) -> Self {
        Self {
            dial_behavior,
            sessions: Mutex::new(VecDeque::new()),
            keepalives: Mutex::new(Vec::new()),
            dialed: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            closed: watch::channel(false).0,
        }
    }

    /// Queue a session for the next `new_session`
    pub fn with_session(self, session: FakeSession) -> Self {
        self.sessions.lock().unwrap().push_back(session);
        self
    }

    pub fn keepalives(&self) -> Vec<Instant> {
        self.keepalives.lock().unwrap().clone()
    }

    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Simulate the server dropping the connection
    pub fn terminate(&self) {
        self.closed.send_replace(true);
    }
}

#[async_trait]
impl SecureClient for FakeClient {
    async fn new_session(&self) -> Result<Box<dyn SecureSession>> {
        match self.sessions.lock().unwrap().pop_front() {
            Some(session) => Ok(Box::new(session)),
            None => Err(Error::SessionAllocation(
                "administratively prohibited".to_string(),
            )),
        }
    }

    async fn dial(&self, address: &str) -> Result<BoxedStream> {
        self.dialed.lock().unwrap().push(address.to_string());

        match self.dial_behavior {
            DialBehavior::Refuse => Err(Error::ForwardDial {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            }),
            DialBehavior::Echo => {
                let (near, far) = tokio::io::duplex(FAKE_PIPE_SIZE);
                tokio::spawn(async move {
                    let (mut reader, mut writer) = tokio::io::split(far);
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                    let _ = writer.shutdown().await;
                });
                Ok(Box::pin(near))
            }
        }
    }

    async fn send_keepalive(&self) -> Result<()> {
        self.keepalives.lock().unwrap().push(Instant::now());
        Ok(())
    }

    async fn wait(&self) -> Result<()> {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.send_replace(true);
        Ok(())
    }
}

/// What happened to a [`FakeSession`]
#[derive(Default)]
pub struct SessionRecord {
    pub pty: Option<(String, WindowSize, Vec<(Pty, u32)>)>,
    pub started: Option<String>,
    pub shell: bool,
    pub closed: usize,
    pub stdin: Vec<u8>,
    pub stdin_closed: bool,
}

/// Session channel with canned output and a recorded history
pub struct FakeSession {
    record: Arc<Mutex<SessionRecord>>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit: Option<Error>,
    fail_pty: bool,
    fail_start: bool,
    resize_tx: mpsc::UnboundedSender<WindowSize>,
    _resize_rx: mpsc::UnboundedReceiver<WindowSize>,
}

impl Default for FakeSession {
    fn default() -> Self {
        let (resize_tx, resize_rx) = mpsc::unbounded_channel();
        Self {
            record: Arc::default(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit: None,
            fail_pty: false,
            fail_start: false,
            resize_tx,
            _resize_rx: resize_rx,
        }
    }
}

impl FakeSession {
    pub fn record(&self) -> Arc<Mutex<SessionRecord>> {
        Arc::clone(&self.record)
    }

    pub fn with_stdout(mut self, bytes: &[u8]) -> Self {
        self.stdout = bytes.to_vec();
        self
    }

    pub fn with_stderr(mut self, bytes: &[u8]) -> Self {
        self.stderr = bytes.to_vec();
        self
    }

    /// Result of `wait`; `None` is a clean exit
    pub fn with_exit(mut self, exit: Option<Error>) -> Self {
        self.exit = exit;
        self
    }

    pub fn with_pty_failure(mut self) -> Self {
        self.fail_pty = true;
        self
    }

    pub fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }
}

/// Writer that lands in a [`SessionRecord`]
struct RecordingStdin(Arc<Mutex<SessionRecord>>);

impl AsyncWrite for RecordingStdin {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().stdin.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.0.lock().unwrap().stdin_closed = true;
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl SecureSession for FakeSession {
    async fn request_pty(
        &mut self,
        term: &str,
        size: WindowSize,
        modes: &[(Pty, u32)],
    ) -> Result<()> {
        if self.fail_pty {
            return Err(Error::connection("pty allocation error"));
        }
        self.record.lock().unwrap().pty = Some((term.to_string(), size, modes.to_vec()));
        Ok(())
    }

    fn resize_sender(&self) -> mpsc::UnboundedSender<WindowSize> {
        self.resize_tx.clone()
    }

    fn stdin_pipe(&mut self) -> Result<BoxedWriter> {
        Ok(Box::new(RecordingStdin(Arc::clone(&self.record))))
    }

    fn stdout_pipe(&mut self) -> Result<BoxedReader> {
        Ok(Box::new(Cursor::new(std::mem::take(&mut self.stdout))))
    }

    fn stderr_pipe(&mut self) -> Result<BoxedReader> {
        Ok(Box::new(Cursor::new(std::mem::take(&mut self.stderr))))
    }

    async fn start(&mut self, command: &str) -> Result<()> {
        if self.fail_start {
            return Err(Error::connection("exec request failed"));
        }
        self.record.lock().unwrap().started = Some(command.to_string());
        Ok(())
    }

    async fn shell(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(Error::connection("shell request failed"));
        }
        self.record.lock().unwrap().shell = true;
        Ok(())
    }

    async fn wait(&mut self) -> Result<()> {
        match self.exit.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.record.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// Dialer that presents [`HOST_KEY`] to the caller's policy
pub struct FakeDialer {
    client: Arc<FakeClient>,
    host_key: PublicKey,
    calls: Mutex<Vec<(String, DialConfig)>>,
}

impl FakeDialer {
    pub fn new(client: Arc<FakeClient>) -> Self {
        Self {
            client,
            host_key: PublicKey::from_openssh(HOST_KEY).unwrap(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, DialConfig)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecureDialer for FakeDialer {
    async fn dial(&self, address: &str, config: DialConfig) -> Result<Arc<dyn SecureClient>> {
        self.calls
            .lock()
            .unwrap()
            .push((address.to_string(), config.clone()));
        config.host_key_policy.verify(&self.host_key)?;
        Ok(Arc::clone(&self.client) as Arc<dyn SecureClient>)
    }
}

/// Listener factory whose listeners accept in-memory connections
#[derive(Default)]
pub struct FakeListenerFactory {
    connectors: Mutex<Vec<FakeConnector>>,
    listened: Mutex<Vec<String>>,
    closed: Arc<AtomicUsize>,
    fail_listen: Option<io::ErrorKind>,
}

impl FakeListenerFactory {
    /// Every `listen` fails with `kind`
    pub fn failing(kind: io::ErrorKind) -> Self {
        Self {
            fail_listen: Some(kind),
            ..Self::default()
        }
    }

    /// Client side of the `index`th listener opened
    pub fn connector(&self, index: usize) -> FakeConnector {
        self.connectors.lock().unwrap()[index].clone()
    }

    pub fn listened(&self) -> Vec<String> {
        self.listened.lock().unwrap().clone()
    }

    /// Number of listeners dropped so far
    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListenerFactory for FakeListenerFactory {
    async fn listen(&self, address: &str) -> io::Result<Box<dyn LocalListener>> {
        if let Some(kind) = self.fail_listen {
            return Err(io::Error::new(kind, format!("listen {}: address in use", address)));
        }

        let (incoming_tx, incoming) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        self.listened.lock().unwrap().push(address.to_string());
        self.connectors.lock().unwrap().push(FakeConnector {
            incoming: incoming_tx,
            closed: closed_rx,
        });

        Ok(Box::new(FakeListener {
            incoming,
            closed: closed_tx,
            closed_count: Arc::clone(&self.closed),
        }))
    }
}

/// Opens connections to one [`FakeListener`]
#[derive(Clone)]
pub struct FakeConnector {
    incoming: mpsc::UnboundedSender<io::Result<BoxedStream>>,
    closed: watch::Receiver<bool>,
}

impl FakeConnector {
    /// Connect and return the local end
    pub async fn connect(&self) -> DuplexStream {
        let (local, accepted) = tokio::io::duplex(FAKE_PIPE_SIZE);
        let _ = self.incoming.send(Ok(Box::pin(accepted)));
        local
    }

    /// Make the listener's next accept fail
    pub fn fail_next_accept(&self, kind: io::ErrorKind) {
        let _ = self.incoming.send(Err(io::Error::from(kind)));
    }

    /// Resolve once the listener has been dropped
    pub async fn wait_closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

struct FakeListener {
    incoming: mpsc::UnboundedReceiver<io::Result<BoxedStream>>,
    closed: watch::Sender<bool>,
    closed_count: Arc<AtomicUsize>,
}

#[async_trait]
impl LocalListener for FakeListener {
    async fn accept(&mut self) -> io::Result<(BoxedStream, SocketAddr)> {
        match self.incoming.recv().await {
            Some(Ok(stream)) => Ok((stream, SocketAddr::from(([127, 0, 0, 1], 50000)))),
            Some(Err(e)) => Err(e),
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
    }
}

impl Drop for FakeListener {
    fn drop(&mut self) {
        self.closed_count.fetch_add(1, Ordering::SeqCst);
        self.closed.send_replace(true);
    }
}

/// Terminal with scripted properties and captured output
#[derive(Default)]
pub struct FakeTerminal {
    size: Mutex<Option<WindowSize>>,
    stdin: Vec<u8>,
    stdin_terminal: bool,
    stdout_terminal: bool,
    fail_raw_mode: bool,
    raw_mode_calls: AtomicUsize,
    restore_calls: AtomicUsize,
    stdout: SharedBuffer,
    stderr: SharedBuffer,
}

impl FakeTerminal {
    pub fn with_size(self, size: WindowSize) -> Self {
        self.set_size(Some(size));
        self
    }

    pub fn with_stdin(mut self, bytes: &[u8]) -> Self {
        self.stdin = bytes.to_vec();
        self
    }

    pub fn with_stdin_terminal(mut self, is_terminal: bool) -> Self {
        self.stdin_terminal = is_terminal;
        self
    }

    pub fn with_stdout_terminal(mut self, is_terminal: bool) -> Self {
        self.stdout_terminal = is_terminal;
        self
    }

    pub fn with_raw_mode_failure(mut self) -> Self {
        self.fail_raw_mode = true;
        self
    }

    /// Change the reported size; `None` makes it unreadable
    pub fn set_size(&self, size: Option<WindowSize>) {
        *self.size.lock().unwrap() = size;
    }

    pub fn raw_mode_calls(&self) -> usize {
        self.raw_mode_calls.load(Ordering::SeqCst)
    }

    pub fn restore_calls(&self) -> usize {
        self.restore_calls.load(Ordering::SeqCst)
    }

    pub fn stdout_contents(&self) -> Vec<u8> {
        self.stdout.contents()
    }

    pub fn stderr_contents(&self) -> Vec<u8> {
        self.stderr.contents()
    }
}

impl TerminalHelper for FakeTerminal {
    fn std_streams(&self) -> StdStreams {
        StdStreams {
            stdin: Box::new(Cursor::new(self.stdin.clone())),
            stdout: Box::new(self.stdout.clone()),
            stderr: Box::new(self.stderr.clone()),
        }
    }

    fn stdin_is_terminal(&self) -> bool {
        self.stdin_terminal
    }

    fn stdout_is_terminal(&self) -> bool {
        self.stdout_terminal
    }

    fn set_raw_mode(&self) -> io::Result<()> {
        self.raw_mode_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_raw_mode {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "not a terminal"));
        }
        Ok(())
    }

    fn restore_terminal(&self) -> io::Result<()> {
        self.restore_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn window_size(&self) -> io::Result<WindowSize> {
        self.size
            .lock()
            .unwrap()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "no window size"))
    }
}
