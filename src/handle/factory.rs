//! Construction of handles from session parameters.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Handle, HttpStream, KernelParams, KernelProcess, PtyProcess, SessionParams};
use crate::backend::BackendClient;
use crate::session::SessionId;
use crate::workspace::WorkspaceEnvironments;
use crate::Result;

/// Opens the handle behind a new session.
#[async_trait]
pub trait HandleFactory: Send + Sync {
    async fn open(&self, id: &SessionId, params: &SessionParams) -> Result<Box<dyn Handle>>;
}

/// Factory for real shells, kernels and backend streams.
pub struct DefaultFactory {
    backend: BackendClient,
    environments: Arc<dyn WorkspaceEnvironments>,
    runtime_dir: PathBuf,
    default_runtime: String,
}

impl DefaultFactory {
    pub fn new(
        backend: BackendClient,
        environments: Arc<dyn WorkspaceEnvironments>,
        runtime_dir: PathBuf,
        default_runtime: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            environments,
            runtime_dir,
            default_runtime: default_runtime.into(),
        }
    }

    pub fn backend(&self) -> &BackendClient {
        &self.backend
    }

    /// Pick the interpreter for a kernel.
    ///
    /// Order: the request's `runtime`, the workspace's configured
    /// environment, then the default runtime.
    pub async fn resolve_runtime(&self, params: &KernelParams) -> String {
        if let Some(runtime) = &params.runtime {
            return runtime.clone();
        }
        if let Some(workspace) = &params.workspace {
            let environments = Arc::clone(&self.environments);
            let path = workspace.clone();
            // The store reads its file synchronously
            let lookup = tokio::task::spawn_blocking(move || environments.get(&path)).await;
            match lookup {
                Ok(Ok(Some(env))) => {
                    if let Some(python) = env.python_binary() {
                        debug!(workspace = %workspace.display(), python = %python.display(), "using workspace environment");
                        return python.to_string_lossy().into_owned();
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    warn!(workspace = %workspace.display(), "cannot read workspace environments: {}", e);
                }
                Err(e) => {
                    warn!(workspace = %workspace.display(), "environment lookup did not finish: {}", e);
                }
            }
        }
        self.default_runtime.clone()
    }

    /// Where a session's kernel writes its connection file.
    pub fn connection_file(&self, id: &SessionId) -> PathBuf {
        // ':' is legal in IDs but not in Windows file names
        let name = id.as_str().replace(':', "_");
        self.runtime_dir.join(format!("kernel-{}.json", name))
    }
}

#[async_trait]
impl HandleFactory for DefaultFactory {
    async fn open(&self, id: &SessionId, params: &SessionParams) -> Result<Box<dyn Handle>> {
        match params {
            SessionParams::InteractiveShell(shell) => Ok(Box::new(PtyProcess::spawn(shell)?)),
            SessionParams::InteractiveKernel(kernel) => {
                let python = self.resolve_runtime(kernel).await;
                let handle = KernelProcess::spawn(&python, self.connection_file(id), kernel)?;
                Ok(Box::new(handle))
            }
            SessionParams::ProxiedStream(stream) => {
                let handle: HttpStream = self.backend.open_stream(&stream.endpoint, &stream.body).await?;
                Ok(Box::new(handle))
            }
        }
    }
}
