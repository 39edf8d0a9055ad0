//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API and auth server URLs and the last used username.
//!
//! Configuration is stored at `~/.config/univida/config.json`. The
//! `UNIVIDA_API_URL` and `UNIVIDA_AUTH_URL` environment variables override
//! the stored URLs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use univida_core::Endpoints;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "univida";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const API_URL_ENV: &str = "UNIVIDA_API_URL";
const AUTH_URL_ENV: &str = "UNIVIDA_AUTH_URL";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub auth_base_url: Option<String>,
    pub last_username: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(API_URL_ENV).filter(|v| !v.is_empty()) {
            self.api_base_url = Some(url);
        }
        if let Some(url) = var(AUTH_URL_ENV).filter(|v| !v.is_empty()) {
            self.auth_base_url = Some(url);
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the persisted session.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn endpoints(&self) -> Endpoints {
        let defaults = Endpoints::default();
        Endpoints::new(
            self.api_base_url.clone().unwrap_or(defaults.api_base_url),
            self.auth_base_url.clone().unwrap_or(defaults.auth_base_url),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let config = Config {
            api_base_url: Some("https://api.example.com".to_string()),
            auth_base_url: None,
            last_username: Some("ana".to_string()),
        };
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.endpoints(), Endpoints::default());
    }

    #[test]
    fn test_env_overrides_urls() {
        let mut config = Config {
            api_base_url: Some("https://stored.example.com".to_string()),
            ..Config::default()
        };
        config.apply_env(|key| match key {
            API_URL_ENV => Some("https://env.example.com/api".to_string()),
            AUTH_URL_ENV => Some(String::new()),
            _ => None,
        });

        let endpoints = config.endpoints();
        assert_eq!(endpoints.api_base_url, "https://env.example.com/api");
        assert_eq!(endpoints.auth_base_url, Endpoints::default().auth_base_url);
    }
}
