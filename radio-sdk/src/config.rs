//! Radio configuration
//!
//! Loaded from JSON; every field has a default so a partial (or missing)
//! file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fsapi::{ClientOptions, ListOrigin};
use fsapi_transport::TransportConfig;
use radio_state::EngineOptions;
use serde::{Deserialize, Serialize};

use crate::SdkError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Device pin, printed in the radio's network settings
    pub pin: String,
    pub list_origin: ListOrigin,
    pub list_page_size: u32,
    /// Share of the device volume range exposed, 1..=100
    pub volume_limit_percent: u8,
    pub path_prefix: String,
    pub connect_timeout_secs: u64,
    /// Must exceed the device's long-poll window
    pub request_timeout_secs: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            pin: "1234".to_string(),
            list_origin: ListOrigin::MinusOne,
            list_page_size: 100,
            volume_limit_percent: 100,
            path_prefix: "fsapi".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 35,
        }
    }
}

impl RadioConfig {
    /// `<config dir>/fsapi-radio/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fsapi-radio").join("config.json"))
    }

    /// Read and validate a config file
    pub fn load(path: &Path) -> Result<Self, SdkError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SdkError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Like [`RadioConfig::load`], but a missing file yields the defaults
    pub fn load_or_default(path: &Path) -> Result<Self, SdkError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_json(text: &str) -> Result<Self, SdkError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| SdkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SdkError> {
        if self.pin.trim().is_empty() {
            return Err(SdkError::Config("pin must not be empty".to_string()));
        }
        if self.list_page_size == 0 {
            return Err(SdkError::Config("list_page_size must be at least 1".to_string()));
        }
        if !(1..=100).contains(&self.volume_limit_percent) {
            return Err(SdkError::Config(format!(
                "volume_limit_percent must be within 1..=100, got {}",
                self.volume_limit_percent
            )));
        }
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            path_prefix: self.path_prefix.clone(),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            list_origin: self.list_origin,
            page_size: self.list_page_size,
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            volume_limit_percent: self.volume_limit_percent,
        }
    }
}
