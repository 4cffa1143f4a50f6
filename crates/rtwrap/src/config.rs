//! Host configuration for rtwrap
//!
//! Configuration is stored as YAML in the user's config directory.
//! Default location: ~/.config/rtwrap/config.yaml

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use rtwrap_core::audio::AudioConfig;
use rtwrap_core::{UI_UPDATE_FPS, UPDATE_FREQ_RATIO};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Backend selection and dummy backend settings
    pub audio: AudioConfig,
    /// Control loop rate (Hz)
    pub ui_fps: u32,
    /// Cycles of UI-bound data buffered before updates are dropped
    pub update_ratio: usize,
    /// Initial control input values by port name
    pub controls: BTreeMap<String, f32>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            ui_fps: UI_UPDATE_FPS,
            update_ratio: UPDATE_FREQ_RATIO,
            controls: BTreeMap::new(),
        }
    }
}

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("rtwrap")
        .join("config.yaml")
}

/// Load configuration from a YAML file
///
/// Missing or invalid files give the default config (with a warning for the latter).
pub fn load_config(path: &Path) -> HostConfig {
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using defaults");
        return HostConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<HostConfig>(&contents) {
            Ok(config) => {
                log::info!(
                    "load_config: Loaded config - backend: {:?}, client: {}, {} initial controls",
                    config.audio.backend,
                    config.audio.client_name,
                    config.controls.len()
                );
                config
            }
            Err(e) => {
                log::warn!("load_config: Failed to parse config: {}, using defaults", e);
                HostConfig::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: Failed to read config file: {}, using defaults", e);
            HostConfig::default()
        }
    }
}

/// Save configuration to a YAML file, creating the parent directory
pub fn save_config(config: &HostConfig, path: &Path) -> Result<()> {
    log::info!("save_config: Saving to {:?}", path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: Config saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtwrap_core::audio::{AutoConnect, BackendKind};

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.ui_fps, 25);
        assert_eq!(config.update_ratio, 60);
        assert_eq!(config.audio.client_name, "rtwrap");
        assert!(config.controls.is_empty());
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = HostConfig::default();
        config.audio = AudioConfig::dummy()
            .with_client_name("wrapped")
            .with_period(128)
            .with_autoconnect(AutoConnect::from_mask(3));
        config.controls.insert("drive".to_string(), 2.5);

        save_config(&config, &path).unwrap();
        let loaded = load_config(&path);
        assert_eq!(loaded, config);
        assert_eq!(loaded.audio.backend, BackendKind::Dummy);
    }

    #[test]
    fn test_partial_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        std::fs::write(&path, "ui_fps: 10\naudio:\n  backend: dummy\n").unwrap();
        let config = load_config(&path);
        assert_eq!(config.ui_fps, 10);
        assert_eq!(config.audio.backend, BackendKind::Dummy);
        assert_eq!(config.audio.period, 256);

        std::fs::write(&path, "ui_fps: [not a number").unwrap();
        assert_eq!(load_config(&path), HostConfig::default());

        assert_eq!(load_config(&dir.path().join("missing.yaml")), HostConfig::default());
    }
}
