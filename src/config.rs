use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ai_provider::{AIConfig, AIProvider};
use crate::prompt::DEFAULT_SYSTEM_PROMPT;

pub const DEFAULT_RECENT_MESSAGES: usize = 8;
pub const DEFAULT_DEBOUNCE_MS: u64 = 1100;

/// User-facing switches of the tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Surface failures as notices, not only in the log
    pub enable_sys_messages: bool,
    pub auto_open_user: bool,
    pub auto_open_bot: bool,
    /// Gates the update scheduler
    pub auto_update: bool,
    pub system_prompt: String,
    pub recent_message_count: usize,
    pub debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            enable_sys_messages: true,
            auto_open_user: true,
            auto_open_bot: true,
            auto_update: true,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            recent_message_count: DEFAULT_RECENT_MESSAGES,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl Settings {
    /// Configured prompt, or the built-in one when left blank.
    pub fn system_prompt(&self) -> &str {
        if self.system_prompt.trim().is_empty() {
            DEFAULT_SYSTEM_PROMPT
        } else {
            &self.system_prompt
        }
    }

    pub fn recent_message_count(&self) -> usize {
        if self.recent_message_count == 0 {
            DEFAULT_RECENT_MESSAGES
        } else {
            self.recent_message_count
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub provider: AIConfig,
}

impl Config {
    pub fn new(data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("stats-tracker")
        });

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        let config_path = data_dir.join("config.json");

        if config_path.exists() {
            let config_str = std::fs::read_to_string(&config_path)
                .context("Failed to read config.json")?;

            if config_str.trim().is_empty() {
                tracing::warn!("Config file is empty, recreating defaults");
            } else {
                match serde_json::from_str::<Config>(&config_str) {
                    Ok(mut config) => {
                        config.data_dir = data_dir;
                        config.apply_env();
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse existing config.json, using defaults: {}", e);
                        let mut config = Self::default_config(data_dir);
                        config.apply_env();
                        return Ok(config);
                    }
                }
            }
        }

        let mut config = Self::default_config(data_dir);
        config.save()?;
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let json_str = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(self.config_file(), json_str).context("Failed to write config.json")?;
        Ok(())
    }

    fn default_config(data_dir: PathBuf) -> Self {
        Config {
            data_dir,
            settings: Settings::default(),
            provider: AIConfig::default(),
        }
    }

    /// Fill an empty OpenAI key from the environment.
    fn apply_env(&mut self) {
        if matches!(self.provider.provider, AIProvider::OpenAI)
            && self.provider.api_key.as_ref().map_or(true, |key| key.is_empty())
        {
            self.provider.api_key = std::env::var("OPENAI_API_KEY").ok();
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn transcript_file(&self) -> PathBuf {
        self.data_dir.join("transcript.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_written() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(Some(dir.path().to_path_buf())).unwrap();

        assert!(config.config_file().exists());
        assert_eq!(config.settings, Settings::default());
        assert_eq!(config.snapshot_file(), dir.path().join("state.json"));
    }

    #[test]
    fn test_partial_settings_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"settings": {"autoUpdate": false, "recentMessageCount": 3}}"#,
        )
        .unwrap();

        let config = Config::new(Some(dir.path().to_path_buf())).unwrap();
        assert!(!config.settings.auto_update);
        assert_eq!(config.settings.recent_message_count(), 3);
        assert!(config.settings.enable_sys_messages);
        assert_eq!(config.settings.debounce(), Duration::from_millis(1100));
    }

    #[test]
    fn test_corrupt_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{oops").unwrap();

        let config = Config::new(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(config.settings, Settings::default());
    }

    #[test]
    fn test_blank_prompt_falls_back() {
        let settings = Settings { system_prompt: "  ".to_string(), recent_message_count: 0, ..Default::default() };
        assert_eq!(settings.system_prompt(), DEFAULT_SYSTEM_PROMPT);
        assert_eq!(settings.recent_message_count(), DEFAULT_RECENT_MESSAGES);
    }
}
