//! Process and stream handles.
//!
//! A handle is the live resource behind a session: a shell on a
//! pseudo-terminal, a stdio child process, or an open HTTP response body.
//! All of them expose the same lifecycle operations and report through a
//! single event receiver that only one subscriber may take.

mod factory;
mod kernel;
mod params;
mod process;
mod pty;
mod stream;

#[cfg(test)]
pub(crate) mod fake;

pub use factory::{DefaultFactory, HandleFactory};
pub use kernel::{ConnectionInfo, KernelProcess};
pub use params::{KernelParams, SessionParams, ShellParams, StreamParams};
pub use process::ChildProcess;
pub use pty::{default_shell, PtyProcess};
pub use stream::HttpStream;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::session::SessionKind;

/// Capacity of a handle's event channel.
///
/// A full channel blocks the producer, which is how a slow event sink
/// slows down the process or stream it is reading from.
pub const EVENT_BUFFER: usize = 256;

/// Read size for process and PTY output.
pub(crate) const READ_BUFFER_SIZE: usize = 4096;

/// Size of a PTY in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Number of rows (height).
    pub rows: u16,
    /// Number of columns (width).
    pub cols: u16,
}

impl PtySize {
    /// Create a new PtySize with the given dimensions.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Something the handle reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleEvent {
    /// Output bytes, in emission order.
    Data(Vec<u8>),
    /// The process exited or the stream ended. Not an error.
    Exit(Option<i32>),
    /// The process or stream failed mid-life.
    Error(String),
}

/// Outcome of one readiness attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Resource is usable.
    Ready,
    /// Not yet; try again after the interval.
    Pending,
    /// Will never become usable.
    Failed(String),
}

/// Uniform lifecycle operations over a live resource.
#[async_trait]
pub trait Handle: Send {
    /// What this handle backs.
    fn kind(&self) -> SessionKind;

    /// Process ID, if the handle is a process.
    fn pid(&self) -> Option<u32> {
        None
    }

    /// Whether the underlying resource is still running.
    fn is_alive(&self) -> bool;

    /// Send input. Silently ignored once the handle is closed, and by
    /// handles that are read-only from this side.
    fn write(&mut self, data: &[u8]);

    /// Change the terminal size. A no-op for handles without a terminal.
    fn resize(&mut self, size: PtySize);

    /// Ask the resource to stop what it is doing. Best-effort.
    fn interrupt(&mut self);

    /// Stop the resource. Child processes get a short terminate grace
    /// before they are killed.
    fn kill(&mut self);

    /// Take the event receiver. Returns `None` after the first call.
    fn take_events(&mut self) -> Option<mpsc::Receiver<HandleEvent>>;

    /// Run one readiness check.
    async fn probe(&mut self) -> Probe {
        Probe::Ready
    }
}
