//! Per-kind parameters for opening a session.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use super::PtySize;
use crate::session::SessionKind;

/// What to open, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SessionParams {
    InteractiveShell(ShellParams),
    InteractiveKernel(KernelParams),
    ProxiedStream(StreamParams),
}

impl SessionParams {
    pub fn kind(&self) -> SessionKind {
        match self {
            SessionParams::InteractiveShell(_) => SessionKind::InteractiveShell,
            SessionParams::InteractiveKernel(_) => SessionKind::InteractiveKernel,
            SessionParams::ProxiedStream(_) => SessionKind::ProxiedStream,
        }
    }
}

/// Parameters for a shell on a pseudo-terminal.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShellParams {
    /// Shell binary; the platform default when absent.
    pub shell: Option<String>,
    pub args: Vec<String>,
    /// Initial working directory.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

impl ShellParams {
    /// Initial size, falling back to 80x24 per missing dimension.
    pub fn size(&self) -> PtySize {
        let default = PtySize::default();
        PtySize::new(
            self.rows.unwrap_or(default.rows),
            self.cols.unwrap_or(default.cols),
        )
    }
}

/// Parameters for a language kernel.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KernelParams {
    /// Workspace whose environment configuration selects the interpreter.
    pub workspace: Option<PathBuf>,
    /// Explicit interpreter, overriding the workspace configuration.
    pub runtime: Option<String>,
    /// Working directory; defaults to the workspace.
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

/// Parameters for a proxied backend stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamParams {
    /// Backend path to POST to, e.g. `/api/stream`.
    pub endpoint: String,
    /// JSON body forwarded unchanged.
    #[serde(default)]
    pub body: serde_json::Value,
}
