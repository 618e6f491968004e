//! Persisted console settings.
//!
//! The settings file is a JSON object shared with other console panels, so
//! keys this crate does not own are preserved on save.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::rate_window::OutputRateLimit;

const SETTINGS_DIR: &str = "sheriff-console";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Output rate limit in KB/s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_rate_limit: Option<u32>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Settings {
    /// `<config dir>/sheriff-console/settings.json`, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(SETTINGS_DIR).join(SETTINGS_FILE))
    }

    /// Load settings; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Write atomically (temp file, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn rate_limit(&self) -> Option<OutputRateLimit> {
        self.console_rate_limit.map(OutputRateLimit::new)
    }

    pub fn set_rate_limit(&mut self, rate_limit: OutputRateLimit) {
        self.console_rate_limit = Some(rate_limit.kb_per_sec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.rate_limit().is_none());
    }

    #[test]
    fn save_then_load_keeps_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r##"{"console_font": "Monospace 10", "console_rate_limit": 250}"##)
            .unwrap();

        let mut settings = Settings::load(&path).unwrap();
        assert_eq!(settings.rate_limit(), Some(OutputRateLimit::new(250)));
        settings.set_rate_limit(OutputRateLimit::new(40));
        settings.save(&path).unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["console_rate_limit"], 40);
        assert_eq!(raw["console_font"], "Monospace 10");
    }

    #[test]
    fn malformed_file_is_a_settings_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = Settings::load(&path).unwrap_err();
        assert!(err.is_settings_error());
    }
}
