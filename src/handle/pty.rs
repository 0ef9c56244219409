//! Shell handle on a native pseudo-terminal, using portable-pty.
//!
//! PTY reads and writes block, so each direction runs on its own blocking
//! thread and talks to the session through channels.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize as NativePtySize};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use super::{Handle, HandleEvent, PtySize, ShellParams, EVENT_BUFFER, READ_BUFFER_SIZE};
use crate::error::SessionError;
use crate::session::SessionKind;
use crate::Result;

/// How long the exit report waits for the reader to drain remaining output.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Ctrl-C as typed into a terminal.
const INTERRUPT: &[u8] = b"\x03";

/// Get the default shell for the current platform.
pub fn default_shell() -> String {
    #[cfg(unix)]
    {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
    #[cfg(windows)]
    {
        "powershell.exe".to_string()
    }
}

fn native_size(size: PtySize) -> NativePtySize {
    NativePtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// A shell process attached to a pseudo-terminal.
pub struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    input: mpsc::UnboundedSender<Vec<u8>>,
    events: Option<mpsc::Receiver<HandleEvent>>,
    alive: Arc<AtomicBool>,
    pid: Option<u32>,
}

impl PtyProcess {
    /// Spawn a shell in a new PTY.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(params: &ShellParams) -> Result<Self> {
        let shell = params.shell.clone().unwrap_or_else(default_shell);
        let spawn_err = |e: &dyn std::fmt::Display| {
            SessionError::Spawn(format!("cannot start shell '{}': {}", shell, e))
        };

        let pair = native_pty_system()
            .openpty(native_size(params.size()))
            .map_err(|e| spawn_err(&e))?;

        let mut cmd = CommandBuilder::new(&shell);
        cmd.args(&params.args);
        if let Some(dir) = &params.cwd {
            cmd.cwd(dir);
        }
        #[cfg(not(windows))]
        {
            cmd.env("TERM", "xterm-256color");
            cmd.env("COLORTERM", "truecolor");
        }
        for (key, value) in &params.env {
            cmd.env(key, value);
        }

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| spawn_err(&e))?;
        // The reader only sees EOF once every slave descriptor is closed
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let reader = pair.master.try_clone_reader().map_err(|e| spawn_err(&e))?;
        let writer = pair.master.take_writer().map_err(|e| spawn_err(&e))?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (drained_tx, drained_rx) = std::sync::mpsc::channel::<()>();
        let alive = Arc::new(AtomicBool::new(true));

        let reader_tx = event_tx.clone();
        tokio::task::spawn_blocking(move || read_loop(reader, reader_tx, drained_tx));

        let writer_tx = event_tx.clone();
        tokio::task::spawn_blocking(move || write_loop(writer, input_rx, writer_tx));

        let waiter_alive = Arc::clone(&alive);
        tokio::task::spawn_blocking(move || {
            let code = match child.wait() {
                Ok(status) => Some(status.exit_code() as i32),
                Err(e) => {
                    warn!("PTY wait failed: {}", e);
                    None
                }
            };
            // Let trailing output land before the exit report
            let _ = drained_rx.recv_timeout(DRAIN_TIMEOUT);
            waiter_alive.store(false, Ordering::SeqCst);
            debug!(?pid, ?code, "PTY child exited");
            let _ = event_tx.blocking_send(HandleEvent::Exit(code));
        });

        debug!(%shell, ?pid, "PTY spawned");

        Ok(Self {
            master: pair.master,
            killer,
            input: input_tx,
            events: Some(event_rx),
            alive,
            pid,
        })
    }
}

fn read_loop(
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::Sender<HandleEvent>,
    _drained: std::sync::mpsc::Sender<()>,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                debug!("PTY reader: EOF");
                break;
            }
            Ok(n) => {
                trace!("PTY reader: read {} bytes", n);
                if tx.blocking_send(HandleEvent::Data(buf[..n].to_vec())).is_err() {
                    debug!("PTY reader: channel closed");
                    break;
                }
            }
            Err(e) => {
                // EIO on Unix means the slave side was closed
                #[cfg(unix)]
                if e.raw_os_error() == Some(libc::EIO) {
                    debug!("PTY reader: PTY closed (EIO)");
                    break;
                }
                if e.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                if e.kind() == std::io::ErrorKind::BrokenPipe {
                    debug!("PTY reader: broken pipe");
                    break;
                }
                error!("PTY reader error: {}", e);
                let _ = tx.blocking_send(HandleEvent::Error(format!("terminal read failed: {}", e)));
                break;
            }
        }
    }
    // Dropping `_drained` tells the waiter the output is flushed
}

fn write_loop(
    mut writer: Box<dyn Write + Send>,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    tx: mpsc::Sender<HandleEvent>,
) {
    while let Some(data) = rx.blocking_recv() {
        trace!("PTY writer: writing {} bytes", data.len());
        let result = writer.write_all(&data).and_then(|_| writer.flush());
        if let Err(e) = result {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                debug!("PTY writer: broken pipe");
            } else {
                error!("PTY writer error: {}", e);
                let _ = tx.blocking_send(HandleEvent::Error(format!("terminal write failed: {}", e)));
            }
            break;
        }
    }
    debug!("PTY writer: channel closed");
}

#[async_trait]
impl Handle for PtyProcess {
    fn kind(&self) -> SessionKind {
        SessionKind::InteractiveShell
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn write(&mut self, data: &[u8]) {
        // Writer thread gone means the terminal closed
        let _ = self.input.send(data.to_vec());
    }

    fn resize(&mut self, size: PtySize) {
        if let Err(e) = self.master.resize(native_size(size)) {
            warn!(pid = ?self.pid, "PTY resize failed: {}", e);
        }
    }

    fn interrupt(&mut self) {
        self.write(INTERRUPT);
    }

    fn kill(&mut self) {
        if !self.is_alive() {
            return;
        }
        if let Err(e) = self.killer.kill() {
            debug!(pid = ?self.pid, "PTY kill: {}", e);
        }
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<HandleEvent>> {
        self.events.take()
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        self.kill();
    }
}
