use std::path::PathBuf;
use tracing::debug;

use crate::host::{HostError, HostResult, KernelParams};

/// [`KernelParams`] backed by the `/proc/sys` tree.
pub struct ProcSysctl {
    root: PathBuf,
}

impl ProcSysctl {
    pub fn new() -> Self {
        Self::with_root("/proc/sys")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        key.split('.').fold(self.root.clone(), |path, part| path.join(part))
    }
}

impl Default for ProcSysctl {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelParams for ProcSysctl {
    fn get(&self, key: &str) -> HostResult<String> {
        match std::fs::read_to_string(self.path(key)) {
            Ok(value) => Ok(value.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(HostError::NotFound(key.to_string()))
            }
            Err(e) => Err(HostError::Io(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> HostResult<()> {
        let path = self.path(key);
        debug!("Setting {} = {} ({})", key, value, path.display());

        std::fs::write(&path, value).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HostError::NotFound(key.to_string())
            } else {
                HostError::Io(e)
            }
        })
    }
}
