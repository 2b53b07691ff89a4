//! Credential temp file
//!
//! Some backends read credentials from a file path given in an environment
//! variable. The file is created with owner-only permissions and removed
//! when the connection that uses it is torn down.

use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::TempPath;
use tracing::{debug, warn};

/// A private temp file holding credential material
pub struct CredentialFile {
    path: PathBuf,
    temp: Mutex<Option<TempPath>>,
}

impl CredentialFile {
    /// Write `contents` to a fresh temp file
    pub fn write(contents: &str) -> std::io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("mcproxy-cred-")
            .tempfile()?;
        file.write_all(contents.as_bytes())?;
        file.flush()?;

        let temp = file.into_temp_path();
        let path = temp.to_path_buf();
        debug!(path = ?path, "[CredentialFile] Created");

        Ok(Self {
            path,
            temp: Mutex::new(Some(temp)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file. Safe to call more than once.
    pub fn close(&self) {
        if let Some(temp) = self.temp.lock().take() {
            if let Err(e) = temp.close() {
                warn!(path = ?self.path, "[CredentialFile] Failed to remove: {}", e);
            } else {
                debug!(path = ?self.path, "[CredentialFile] Removed");
            }
        }
    }
}

impl Drop for CredentialFile {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CredentialFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialFile")
            .field("path", &self.path)
            .finish()
    }
}
