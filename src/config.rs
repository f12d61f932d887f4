use crate::engine::EngineKind;
use crate::model::PlayMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "tuneplay";
const SETTINGS_FILE: &str = "settings.json";
const LYRICS_DIR: &str = "lyrics";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSettings {
    #[serde(default)]
    pub play_mode: PlayMode,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_failover_delay_ms")]
    pub failover_delay_ms: u64,
    #[serde(default = "default_single_loop_restart_ms")]
    pub single_loop_restart_ms: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_duck_volume")]
    pub duck_volume: f32,
    #[serde(default)]
    pub primary_engine: EngineKind,
    #[serde(default)]
    pub lyrics_dir: Option<PathBuf>,
}

fn default_volume() -> f32 {
    1.0
}

fn default_progress_interval_ms() -> u64 {
    200
}

fn default_max_consecutive_errors() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    300
}

fn default_failover_delay_ms() -> u64 {
    500
}

fn default_single_loop_restart_ms() -> u64 {
    3000
}

fn default_history_capacity() -> usize {
    50
}

fn default_duck_volume() -> f32 {
    0.3
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            play_mode: PlayMode::default(),
            volume: default_volume(),
            progress_interval_ms: default_progress_interval_ms(),
            max_consecutive_errors: default_max_consecutive_errors(),
            retry_delay_ms: default_retry_delay_ms(),
            failover_delay_ms: default_failover_delay_ms(),
            single_loop_restart_ms: default_single_loop_restart_ms(),
            history_capacity: default_history_capacity(),
            duck_volume: default_duck_volume(),
            primary_engine: EngineKind::default(),
            lyrics_dir: None,
        }
    }
}

impl PlayerSettings {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(10))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn failover_delay(&self) -> Duration {
        Duration::from_millis(self.failover_delay_ms)
    }

    /// Lyrics directory to use, falling back to `<config root>/lyrics`.
    pub fn resolved_lyrics_dir(&self) -> Result<PathBuf> {
        match &self.lyrics_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(config_root()?.join(LYRICS_DIR)),
        }
    }
}

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("TUNEPLAY_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .context("neither HOME nor USERPROFILE is set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(config_root()?.join(SETTINGS_FILE))
}

pub fn load_settings() -> Result<PlayerSettings> {
    load_settings_from(&settings_path()?)
}

pub fn save_settings(settings: &PlayerSettings) -> Result<()> {
    save_settings_to(&settings_path()?, settings)
}

pub fn load_settings_from(path: &Path) -> Result<PlayerSettings> {
    if !path.exists() {
        return Ok(PlayerSettings::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    let settings: PlayerSettings = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse settings file {}", path.display()))?;
    Ok(settings)
}

pub fn save_settings_to(path: &Path, settings: &PlayerSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join(SETTINGS_FILE);

        let settings = PlayerSettings {
            play_mode: PlayMode::Loop,
            duck_volume: 0.2,
            primary_engine: EngineKind::Buffered,
            ..PlayerSettings::default()
        };
        save_settings_to(&path, &settings).expect("save");
        let loaded = load_settings_from(&path).expect("load");
        assert_eq!(loaded, settings);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().expect("tempdir");
        let loaded = load_settings_from(&dir.path().join("absent.json")).expect("load");
        assert_eq!(loaded, PlayerSettings::default());
        assert_eq!(loaded.max_consecutive_errors, 3);
        assert_eq!(loaded.history_capacity, 50);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, r#"{ "play_mode": "Shuffle", "progress_interval_ms": 100 }"#)
            .expect("write");

        let loaded = load_settings_from(&path).expect("load");
        assert_eq!(loaded.play_mode, PlayMode::Shuffle);
        assert_eq!(loaded.progress_interval(), Duration::from_millis(100));
        assert_eq!(loaded.failover_delay(), Duration::from_millis(500));
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, "{ not json").expect("write");

        let err = load_settings_from(&path).expect_err("should fail");
        assert!(format!("{err:#}").contains(SETTINGS_FILE));
    }
}
