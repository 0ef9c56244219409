//! Child process with plain stdio pipes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{Handle, HandleEvent, PtySize, EVENT_BUFFER, READ_BUFFER_SIZE};
use crate::error::SessionError;
use crate::session::SessionKind;
use crate::Result;

/// How long the exit report waits for stdout/stderr to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// How long a terminated child gets to exit before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// A process whose stdout and stderr are forwarded as data events.
pub struct ChildProcess {
    kind: SessionKind,
    program: String,
    pid: Option<u32>,
    stdin: mpsc::UnboundedSender<Vec<u8>>,
    kill: Option<oneshot::Sender<()>>,
    events: Option<mpsc::Receiver<HandleEvent>>,
    alive: Arc<AtomicBool>,
}

impl ChildProcess {
    /// Spawn `program` with `args`.
    ///
    /// A binary that cannot be started fails here with
    /// [`SessionError::Spawn`]; `not_found` formats the message for a
    /// missing binary.
    pub fn spawn(
        kind: SessionKind,
        program: &str,
        args: &[String],
        cwd: Option<&PathBuf>,
        env: &HashMap<String, String>,
        not_found: impl FnOnce(&str) -> String,
    ) -> Result<Self> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SessionError::Spawn(not_found(program))
            } else {
                SessionError::Spawn(format!("cannot start '{}': {}", program, e))
            }
        })?;

        let pid = child.id();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (kill_tx, kill_rx) = oneshot::channel();
        let alive = Arc::new(AtomicBool::new(true));

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(stdout, event_tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(stderr, event_tx.clone())));
        }

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                while let Some(data) = stdin_rx.recv().await {
                    if let Err(e) = stdin.write_all(&data).await {
                        debug!("stdin closed: {}", e);
                        break;
                    }
                    let _ = stdin.flush().await;
                }
            });
        }

        let waiter_alive = Arc::clone(&alive);
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => terminate(&mut child, pid).await,
            };
            let code = status.ok().and_then(|s| s.code());
            let _ = tokio::time::timeout(DRAIN_TIMEOUT, futures_util::future::join_all(readers)).await;
            waiter_alive.store(false, Ordering::SeqCst);
            debug!(?pid, ?code, "child exited");
            let _ = event_tx.send(HandleEvent::Exit(code)).await;
        });

        debug!(%program, ?pid, "child spawned");

        Ok(Self {
            kind,
            program: program.to_string(),
            pid,
            stdin: stdin_tx,
            kill: Some(kill_tx),
            events: Some(event_rx),
            alive,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Send `SIGINT` to the process.
    #[cfg(unix)]
    pub fn signal_interrupt(&self) {
        let Some(pid) = self.pid else {
            return;
        };
        if !self.is_alive() {
            return;
        }
        // SAFETY: kill(2) with a pid we spawned and a valid signal number
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
        if rc != 0 {
            debug!(pid, "SIGINT failed: {}", std::io::Error::last_os_error());
        }
    }

    /// No portable console interrupt for a detached child on Windows.
    #[cfg(windows)]
    pub fn signal_interrupt(&self) {
        debug!(pid = ?self.pid, "interrupt not supported for stdio processes on Windows");
    }
}

/// Ask the child to exit, killing it if it is still running after
/// [`TERMINATE_GRACE`].
async fn terminate(child: &mut Child, pid: Option<u32>) -> std::io::Result<ExitStatus> {
    if pid.is_some_and(send_terminate) {
        if let Ok(status) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
            return status;
        }
        debug!(?pid, grace = ?TERMINATE_GRACE, "child ignored SIGTERM");
    }
    if let Err(e) = child.kill().await {
        warn!(?pid, "kill failed: {}", e);
    }
    child.wait().await
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> bool {
    // SAFETY: kill(2) with a pid we spawned and a valid signal number
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        debug!(pid, "SIGTERM failed: {}", std::io::Error::last_os_error());
    }
    rc == 0
}

/// Windows has no polite stop for a console-less child.
#[cfg(windows)]
fn send_terminate(_pid: u32) -> bool {
    false
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<HandleEvent>) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(HandleEvent::Data(buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(HandleEvent::Error(format!("read failed: {}", e))).await;
                break;
            }
        }
    }
}

#[async_trait]
impl Handle for ChildProcess {
    fn kind(&self) -> SessionKind {
        self.kind
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn write(&mut self, data: &[u8]) {
        let _ = self.stdin.send(data.to_vec());
    }

    fn resize(&mut self, _size: PtySize) {}

    fn interrupt(&mut self) {
        self.signal_interrupt();
    }

    fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<HandleEvent>> {
        self.events.take()
    }
}
