use std::path::{Path, PathBuf};

/// Holds the PID file for the lifetime of the process and removes it on drop.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, std::process::id().to_string())
            .map_err(|e| anyhow::anyhow!("Failed to write PID file {}: {}", path.display(), e))?;
        log::info!("PID {} written to {}", std::process::id(), path.display());
        Ok(Self { path: path.to_path_buf() })
    }

}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("Failed to remove PID file {}: {}", self.path.display(), e);
        }
    }
}
