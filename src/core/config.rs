use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::video::scrub_controller::DEFAULT_SCRUB_DEBOUNCE;
use crate::video::ResolutionProfile;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the `segment_*.mp4` files to trim
    pub segment_directory: PathBuf,
    pub output_directory: PathBuf,
    pub transcoder_path: PathBuf,
    pub prober_path: PathBuf,
    /// Clip folder on the device's SD card (recorded only, copying is done elsewhere)
    pub device_mount_path: PathBuf,
    pub index_file: PathBuf,
    pub command_file: PathBuf,
    pub pid_file: PathBuf,
    /// Where `screenshot` writes PNG captures of the current frame
    pub screenshot_directory: PathBuf,
    pub decode_join_timeout_ms: u64,
    pub scrub_debounce_ms: u64,
    pub default_profile: ResolutionProfile,
}

impl Default for AppConfig {
    fn default() -> Self {
        let temp = std::env::temp_dir();
        Self {
            segment_directory: PathBuf::from("./segments"),
            output_directory: PathBuf::from("./structure"),
            transcoder_path: PathBuf::from("ffmpeg"),
            prober_path: PathBuf::from("ffprobe"),
            device_mount_path: PathBuf::from("/Volumes/STRUCT_SD/clips"),
            index_file: PathBuf::from("./segments/segment_index.json"),
            command_file: temp.join("structure_exporter_cmd"),
            pid_file: temp.join("structure_exporter.pid"),
            screenshot_directory: temp,
            decode_join_timeout_ms: 1000,
            scrub_debounce_ms: DEFAULT_SCRUB_DEBOUNCE.as_millis() as u64,
            default_profile: ResolutionProfile::Vga640,
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .map_err(|e| anyhow::anyhow!("Failed to read config file at {}: {}", config_path.display(), e))?;

            match serde_json::from_str::<Self>(&content) {
                Ok(config) => {
                    log::info!("Loaded existing config from {}", config_path.display());
                    Ok(config)
                }
                Err(e) => {
                    log::warn!("Config file exists but has issues ({}), creating new one with defaults", e);
                    let new_config = Self::default();
                    new_config.save_to(config_path)
                        .map_err(|save_err| anyhow::anyhow!("Failed to save new config: {}", save_err))?;
                    log::info!("Created new config file at {}", config_path.display());
                    Ok(new_config)
                }
            }
        } else {
            log::info!("No config file found, creating default config");
            let config = Self::default();
            config.save_to(config_path)
                .map_err(|e| anyhow::anyhow!("Failed to save default config: {}", e))?;
            log::info!("Created new config file at {}", config_path.display());
            Ok(config)
        }
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("structure-exporter")
            .join("config.json")
    }

    pub fn decode_join_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_join_timeout_ms)
    }

    pub fn scrub_debounce(&self) -> Duration {
        Duration::from_millis(self.scrub_debounce_ms)
    }

    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        log::debug!("Ensuring directories exist...");

        if let Err(e) = std::fs::create_dir_all(&self.output_directory) {
            log::error!("Failed to create output directory {}: {}", self.output_directory.display(), e);
            return Err(anyhow::anyhow!("Failed to create output directory {}: {}", self.output_directory.display(), e));
        }
        log::debug!("Output directory ensured: {}", self.output_directory.display());

        if !self.segment_directory.is_dir() {
            log::warn!("Segment directory {} does not exist, no segments will be listed", self.segment_directory.display());
        }

        if !self.device_mount_path.is_dir() {
            log::debug!("Device clip folder {} is not mounted", self.device_mount_path.display());
        }

        Ok(())
    }
}
