//! Language kernel launched through `ipykernel_launcher`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{ChildProcess, Handle, HandleEvent, KernelParams, Probe, PtySize};
use crate::session::SessionKind;
use crate::Result;

/// Connect timeout for the shell-port check.
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Connection file written by the kernel once its sockets are bound.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    pub shell_port: u16,
    #[serde(default)]
    pub iopub_port: u16,
    #[serde(default)]
    pub stdin_port: u16,
    #[serde(default)]
    pub control_port: u16,
    #[serde(default)]
    pub hb_port: u16,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub signature_scheme: String,
}

fn default_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_transport() -> String {
    "tcp".to_string()
}

impl ConnectionInfo {
    /// Read and parse a connection file. `None` while it is missing or
    /// still being written.
    pub async fn read(path: &Path) -> Option<Self> {
        let text = tokio::fs::read_to_string(path).await.ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Address of the shell socket.
    pub fn shell_addr(&self) -> Option<SocketAddr> {
        format!("{}:{}", self.ip, self.shell_port).parse().ok()
    }
}

/// A kernel process plus the connection file it reports through.
pub struct KernelProcess {
    child: ChildProcess,
    connection_file: PathBuf,
    info: Option<ConnectionInfo>,
}

impl KernelProcess {
    /// Launch `<python> -m ipykernel_launcher -f <connection_file>`.
    pub fn spawn(python: &str, connection_file: PathBuf, params: &KernelParams) -> Result<Self> {
        if let Some(parent) = connection_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // A stale file from an earlier run would look ready immediately
        let _ = std::fs::remove_file(&connection_file);

        let args = vec![
            "-m".to_string(),
            "ipykernel_launcher".to_string(),
            "-f".to_string(),
            connection_file.to_string_lossy().into_owned(),
        ];
        let cwd = params.cwd.as_ref().or(params.workspace.as_ref());

        let child = ChildProcess::spawn(
            SessionKind::InteractiveKernel,
            python,
            &args,
            cwd,
            &params.env,
            |program| format!("kernel runtime not found: {}", program),
        )?;

        debug!(%python, file = %connection_file.display(), pid = ?child.pid(), "kernel launched");

        Ok(Self {
            child,
            connection_file,
            info: None,
        })
    }

    pub fn connection_file(&self) -> &Path {
        &self.connection_file
    }

    /// Connection details, once the probe has seen the file.
    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.info.as_ref()
    }
}

#[async_trait]
impl Handle for KernelProcess {
    fn kind(&self) -> SessionKind {
        SessionKind::InteractiveKernel
    }

    fn pid(&self) -> Option<u32> {
        self.child.pid()
    }

    fn is_alive(&self) -> bool {
        self.child.is_alive()
    }

    fn write(&mut self, data: &[u8]) {
        self.child.write(data);
    }

    fn resize(&mut self, _size: PtySize) {}

    fn interrupt(&mut self) {
        self.child.interrupt();
    }

    fn kill(&mut self) {
        self.child.kill();
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<HandleEvent>> {
        self.child.take_events()
    }

    async fn probe(&mut self) -> Probe {
        if !self.child.is_alive() {
            return Probe::Failed("kernel exited before becoming ready".to_string());
        }
        if self.info.is_none() {
            self.info = ConnectionInfo::read(&self.connection_file).await;
        }
        let Some(info) = &self.info else {
            trace!(file = %self.connection_file.display(), "connection file not ready");
            return Probe::Pending;
        };
        let Some(addr) = info.shell_addr() else {
            return Probe::Failed(format!("bad kernel address {}:{}", info.ip, info.shell_port));
        };
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => Probe::Ready,
            _ => Probe::Pending,
        }
    }
}

impl Drop for KernelProcess {
    fn drop(&mut self) {
        self.child.kill();
        if let Err(e) = std::fs::remove_file(&self.connection_file) {
            trace!("connection file cleanup: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use std::collections::HashMap;

    #[test]
    fn test_connection_info_parse() {
        let json = r#"{
            "shell_port": 50001,
            "iopub_port": 50002,
            "stdin_port": 50003,
            "control_port": 50004,
            "hb_port": 50005,
            "ip": "127.0.0.1",
            "key": "abc",
            "transport": "tcp",
            "signature_scheme": "hmac-sha256",
            "kernel_name": ""
        }"#;
        let info: ConnectionInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.shell_port, 50001);
        assert_eq!(info.shell_addr(), Some("127.0.0.1:50001".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_missing_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let result = KernelProcess::spawn(
            "no-such-python-runtime",
            dir.path().join("kernel-k1.json"),
            &KernelParams::default(),
        );
        match result {
            Err(SessionError::Spawn(msg)) => {
                assert_eq!(msg, "kernel runtime not found: no-such-python-runtime")
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[tokio::test]
    async fn test_read_incomplete_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.json");
        assert!(ConnectionInfo::read(&path).await.is_none());
        std::fs::write(&path, "{\"shell_po").unwrap();
        assert!(ConnectionInfo::read(&path).await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_ready_when_port_listens() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.json");

        // `sleep` stands in for the interpreter
        let mut kernel = KernelProcess {
            child: ChildProcess::spawn(
                SessionKind::InteractiveKernel,
                "sleep",
                &["5".to_string()],
                None,
                &HashMap::new(),
                |p| p.to_string(),
            )
            .unwrap(),
            connection_file: path.clone(),
            info: None,
        };

        assert_eq!(kernel.probe().await, Probe::Pending);
        std::fs::write(&path, format!(r#"{{"shell_port": {}, "ip": "127.0.0.1"}}"#, port)).unwrap();
        assert_eq!(kernel.probe().await, Probe::Ready);

        drop(kernel);
        assert!(!path.exists());
    }
}
