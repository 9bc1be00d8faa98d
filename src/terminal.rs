//! Local terminal access
//!
//! The interactive session only talks to the local terminal through the
//! [`TerminalHelper`] trait, so tests can substitute in-memory streams.

use std::io::{self, IsTerminal};

use tokio::io::{AsyncRead, AsyncWrite};

/// Boxed reader for a local or remote byte stream
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed writer for a local or remote byte stream
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Dimensions assumed when the local terminal size cannot be read
pub const DEFAULT_WINDOW_SIZE: WindowSize = WindowSize {
    width: 80,
    height: 43,
};

/// Terminal dimensions in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl WindowSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// The local process's standard streams
pub struct StdStreams {
    pub stdin: BoxedReader,
    pub stdout: BoxedWriter,
    pub stderr: BoxedWriter,
}

/// Terminal I/O provider
pub trait TerminalHelper: Send + Sync {
    /// Standard input, output and error of the local process
    fn std_streams(&self) -> StdStreams;

    /// Whether standard input is attached to a terminal
    fn stdin_is_terminal(&self) -> bool;

    /// Whether standard output is attached to a terminal
    fn stdout_is_terminal(&self) -> bool;

    /// Put the local terminal into raw mode
    fn set_raw_mode(&self) -> io::Result<()>;

    /// Undo [`TerminalHelper::set_raw_mode`]
    fn restore_terminal(&self) -> io::Result<()>;

    /// Current dimensions of the local terminal
    fn window_size(&self) -> io::Result<WindowSize>;
}

/// Current window size of `terminal`, or [`DEFAULT_WINDOW_SIZE`] if unknown
pub fn window_dimensions(terminal: &dyn TerminalHelper) -> WindowSize {
    terminal.window_size().unwrap_or(DEFAULT_WINDOW_SIZE)
}

/// Terminal backed by the process's stdio and crossterm
#[derive(Debug, Clone, Copy, Default)]
pub struct StdTerminal;

impl TerminalHelper for StdTerminal {
    fn std_streams(&self) -> StdStreams {
        StdStreams {
            stdin: Box::new(tokio::io::stdin()),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
        }
    }

    fn stdin_is_terminal(&self) -> bool {
        io::stdin().is_terminal()
    }

    fn stdout_is_terminal(&self) -> bool {
        io::stdout().is_terminal()
    }

    fn set_raw_mode(&self) -> io::Result<()> {
        crossterm::terminal::enable_raw_mode()
    }

    fn restore_terminal(&self) -> io::Result<()> {
        crossterm::terminal::disable_raw_mode()
    }

    fn window_size(&self) -> io::Result<WindowSize> {
        let (cols, rows) = crossterm::terminal::size()?;
        Ok(WindowSize::new(u32::from(cols), u32::from(rows)))
    }
}
