//! Folder-backed host capabilities for the command-line runner.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::script::builtins::{Host, HostFuture};
use crate::script::Stream;

/// Serves `getFiles` / `loadFile` from one folder and records `sideOutput`
/// values for the caller to drain after the run.
#[derive(Debug)]
pub struct FolderHost {
    folder: PathBuf,
    side: Mutex<Vec<(String, Stream)>>,
}

impl FolderHost {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            side: Mutex::new(Vec::new()),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Side outputs in the order they were emitted.
    pub fn take_side_outputs(&self) -> Vec<(String, Stream)> {
        match self.side.lock() {
            Ok(mut side) => std::mem::take(&mut *side),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

/// `name` must be a bare file name inside the folder.
fn plain_name(name: &str) -> Result<&str, String> {
    if name.is_empty() || Path::new(name).file_name() != Some(OsStr::new(name)) {
        return Err(format!("'{name}' is not a file name"));
    }
    Ok(name)
}

impl Host for FolderHost {
    fn side_output(&self, label: &str, value: &Stream) -> Result<(), String> {
        let mut side = self
            .side
            .lock()
            .map_err(|_| "side output lock poisoned".to_owned())?;
        side.push((label.to_owned(), value.clone()));
        Ok(())
    }

    fn list_files(&self) -> HostFuture<'_, Vec<String>> {
        Box::pin(async move {
            let err = |e: std::io::Error| format!("{}: {e}", self.folder.display());
            let mut entries = tokio::fs::read_dir(&self.folder).await.map_err(err)?;
            let mut names = Vec::new();
            while let Some(entry) = entries.next_entry().await.map_err(err)? {
                let is_file = entry.file_type().await.map_err(err)?.is_file();
                if is_file {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            names.sort();
            Ok(names)
        })
    }

    fn load_file<'a>(&'a self, name: &'a str) -> HostFuture<'a, String> {
        Box::pin(async move {
            let name = plain_name(name)?;
            tokio::fs::read_to_string(self.folder.join(name))
                .await
                .map_err(|e| format!("{name}: {e}"))
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
