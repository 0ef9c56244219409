//! Per-workspace Python environment configuration.
//!
//! The store is a single JSON object keyed by workspace path. Writes go to
//! a temporary file that is renamed over the original.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SessionError;
use crate::Result;

/// Kind of Python environment a workspace uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentType {
    Venv,
    Conda,
    System,
}

/// Environment record for one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    #[serde(rename = "type")]
    pub env_type: EnvironmentType,
    /// Environment root for venv and conda.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Interpreter for system environments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_path: Option<PathBuf>,
}

impl EnvironmentConfig {
    /// Interpreter to launch for this environment.
    pub fn python_binary(&self) -> Option<PathBuf> {
        match self.env_type {
            EnvironmentType::Venv | EnvironmentType::Conda => {
                let root = self.path.as_ref()?;
                if cfg!(windows) {
                    Some(root.join("Scripts").join("python.exe"))
                } else {
                    Some(root.join("bin").join("python"))
                }
            }
            EnvironmentType::System => self.python_path.clone(),
        }
    }
}

/// Lookup of workspace environment records.
pub trait WorkspaceEnvironments: Send + Sync {
    fn get(&self, workspace: &Path) -> Result<Option<EnvironmentConfig>>;
    fn set(&self, workspace: &Path, env: EnvironmentConfig) -> Result<()>;
}

/// JSON file implementation of [`WorkspaceEnvironments`].
pub struct EnvironmentStore {
    path: PathBuf,
    // Serialises read-modify-write cycles
    lock: Mutex<()>,
}

impl EnvironmentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn key(workspace: &Path) -> String {
        workspace.to_string_lossy().into_owned()
    }

    fn load(&self) -> Result<BTreeMap<String, EnvironmentConfig>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, entries: &BTreeMap<String, EnvironmentConfig>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl WorkspaceEnvironments for EnvironmentStore {
    fn get(&self, workspace: &Path) -> Result<Option<EnvironmentConfig>> {
        let _guard = self.lock.lock().map_err(|_| SessionError::LockPoisoned)?;
        Ok(self.load()?.remove(&Self::key(workspace)))
    }

    fn set(&self, workspace: &Path, env: EnvironmentConfig) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| SessionError::LockPoisoned)?;
        let mut entries = self.load()?;
        debug!(workspace = %workspace.display(), env_type = ?env.env_type, "workspace environment set");
        entries.insert(Self::key(workspace), env);
        self.save(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn venv(root: &str) -> EnvironmentConfig {
        EnvironmentConfig {
            env_type: EnvironmentType::Venv,
            path: Some(PathBuf::from(root)),
            python_path: None,
        }
    }

    #[test]
    fn test_python_binary() {
        let binary = venv("/work/.venv").python_binary().unwrap();
        if cfg!(windows) {
            assert!(binary.ends_with("Scripts/python.exe"));
        } else {
            assert_eq!(binary, PathBuf::from("/work/.venv/bin/python"));
        }

        let system = EnvironmentConfig {
            env_type: EnvironmentType::System,
            path: None,
            python_path: Some(PathBuf::from("/usr/bin/python3")),
        };
        assert_eq!(system.python_binary(), Some(PathBuf::from("/usr/bin/python3")));

        let conda_without_root = EnvironmentConfig {
            env_type: EnvironmentType::Conda,
            path: None,
            python_path: None,
        };
        assert!(conda_without_root.python_binary().is_none());
    }

    #[test]
    fn test_wire_format() {
        let json = r#"{"type":"system","pythonPath":"/usr/bin/python3"}"#;
        let env: EnvironmentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(env.env_type, EnvironmentType::System);
        assert_eq!(serde_json::to_string(&env).unwrap(), json);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnvironmentStore::new(dir.path().join("envs.json"));
        assert!(store.get(Path::new("/work")).unwrap().is_none());
    }

    #[test]
    fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = EnvironmentStore::new(dir.path().join("nested").join("envs.json"));

        store.set(Path::new("/work/a"), venv("/work/a/.venv")).unwrap();
        store.set(Path::new("/work/b"), venv("/work/b/env")).unwrap();

        assert_eq!(store.get(Path::new("/work/a")).unwrap(), Some(venv("/work/a/.venv")));
        assert_eq!(store.get(Path::new("/work/b")).unwrap(), Some(venv("/work/b/env")));
        assert!(!store.path().with_extension("json.tmp").exists());

        // A second store over the same file sees both entries
        let reopened = EnvironmentStore::new(store.path());
        assert!(reopened.get(Path::new("/work/b")).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envs.json");
        std::fs::write(&path, "not json").unwrap();
        let store = EnvironmentStore::new(&path);
        assert!(matches!(store.get(Path::new("/work")), Err(SessionError::Json(_))));
    }
}
