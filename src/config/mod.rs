use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::crop::{CropPreset, MAX_PIXEL_DENSITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConfigPathError {
    MissingHomeDirectory,
}

const APP_DIR: &str = "retoucher";
const APP_CONFIG_FILE: &str = "config.json";
const DEFAULT_GENERATOR_TIMEOUT_SECS: u64 = 120;

/// Application-level settings from `config.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Program and leading arguments of the external generator.
    pub generator_command: Vec<String>,
    pub generator_timeout_secs: u64,
    /// Output scale for crops.
    pub pixel_density: f64,
    pub download_dir: Option<PathBuf>,
    pub default_crop_preset: CropPreset,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            generator_command: Vec::new(),
            generator_timeout_secs: DEFAULT_GENERATOR_TIMEOUT_SECS,
            pixel_density: 1.0,
            download_dir: None,
            default_crop_preset: CropPreset::default(),
        }
    }
}

impl AppConfig {
    pub const fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator_timeout_secs)
    }

    /// Density the dispatcher should use; invalid or oversized values fall back to 1.
    pub fn effective_pixel_density(&self) -> f64 {
        if self.pixel_density.is_finite()
            && self.pixel_density > 0.0
            && self.pixel_density <= MAX_PIXEL_DENSITY
        {
            self.pixel_density
        } else {
            tracing::warn!(
                pixel_density = self.pixel_density,
                "invalid pixel_density; using 1.0"
            );
            1.0
        }
    }
}

pub fn load_app_config() -> AppConfig {
    let (xdg_config_home, home) = config_env_dirs();
    load_app_config_with(xdg_config_home.as_deref(), home.as_deref())
}

/// Loads an explicit config file. Unlike the default lookup, a missing file is
/// an error here.
pub fn load_app_config_from(path: &Path) -> std::io::Result<AppConfig> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(std::io::Error::other)
}

fn load_app_config_with(xdg_config_home: Option<&Path>, home: Option<&Path>) -> AppConfig {
    let path = match app_config_path(APP_DIR, APP_CONFIG_FILE, xdg_config_home, home) {
        Ok(p) => p,
        Err(_) => return AppConfig::default(),
    };
    if !path.exists() {
        return AppConfig::default();
    }
    match std::fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
            tracing::warn!(?err, ?path, "failed to parse config.json; using defaults");
            AppConfig::default()
        }),
        Err(err) => {
            tracing::warn!(?err, ?path, "failed to read config.json; using defaults");
            AppConfig::default()
        }
    }
}

pub(crate) fn config_env_dirs() -> (Option<PathBuf>, Option<PathBuf>) {
    (
        std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

pub(crate) fn app_config_path(
    app_dir: &str,
    file_name: &str,
    xdg_config_home: Option<&Path>,
    home: Option<&Path>,
) -> Result<PathBuf, ConfigPathError> {
    let mut path = config_root(xdg_config_home, home)?;
    path.push(app_dir);
    path.push(file_name);
    Ok(path)
}

fn config_root(
    xdg_config_home: Option<&Path>,
    home: Option<&Path>,
) -> Result<PathBuf, ConfigPathError> {
    if let Some(xdg) = xdg_config_home.filter(|path| !path.as_os_str().is_empty()) {
        return Ok(xdg.to_path_buf());
    }

    let home = home.ok_or(ConfigPathError::MissingHomeDirectory)?;
    Ok(home.join(".config"))
}
