//! Side-effecting collaborators of the orchestrator.

pub mod attempt_log;
pub mod backend;
pub mod config;
pub mod event_bus;
pub mod git;
pub mod init;
pub mod locks;
pub mod process;
pub mod prompt;
pub mod schema;
pub mod state_store;
pub mod symbols;
pub mod tracker;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Write `contents` via a sibling temp file and rename, creating parent dirs.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
