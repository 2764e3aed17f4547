use crate::error::{Result, ScriptcastError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

fn default_database_url() -> String {
    "sqlite://scriptcast.db".to_string()
}

fn default_audio_root() -> PathBuf {
    PathBuf::from("audio_output")
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_voice_config_file() -> PathBuf {
    PathBuf::from("voice_config.json")
}

fn default_max_concurrent_tasks() -> usize {
    2
}

fn default_chunk_concurrency() -> usize {
    4
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_audio_interval_minutes() -> u64 {
    5
}

fn default_tts_char_limit() -> usize {
    3500
}

fn default_primary_language() -> String {
    "Vietnamese".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:5001".to_string()
}

/// Runtime configuration for all scriptcast roles.
///
/// Loaded from an optional TOML file under the user config directory, then
/// overridden by environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub tts_api_key: Option<String>,
    pub tts_base_url: Option<String>,

    /// Root directory for generated chunk and combined audio files.
    #[serde(default = "default_audio_root")]
    pub audio_root: PathBuf,

    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,

    #[serde(default = "default_voice_config_file")]
    pub voice_config_file: PathBuf,

    /// Generations processed in parallel by one content worker.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Chunk-level concurrency inside one generation (content fan-out and
    /// the parallel audio worker).
    #[serde(default = "default_chunk_concurrency")]
    pub chunk_concurrency: usize,

    #[serde(default = "default_poll_interval_secs")]
    pub content_poll_interval_secs: u64,

    #[serde(default = "default_audio_interval_minutes")]
    pub primary_audio_interval_minutes: u64,

    #[serde(default = "default_audio_interval_minutes")]
    pub other_audio_interval_minutes: u64,

    /// Texts longer than this are split into sub-chunks before TTS.
    #[serde(default = "default_tts_char_limit")]
    pub tts_char_limit: usize,

    /// Language handled by the serial audio worker.
    #[serde(default = "default_primary_language")]
    pub primary_language: String,

    /// UI language suggestions are translated into.
    #[serde(default = "default_primary_language")]
    pub display_language: String,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Per-language characters-per-minute overrides for script sizing.
    #[serde(default)]
    pub cpm: HashMap<String, u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            openai_api_key: None,
            openai_base_url: None,
            tts_api_key: None,
            tts_base_url: None,
            audio_root: default_audio_root(),
            ffmpeg_path: default_ffmpeg(),
            voice_config_file: default_voice_config_file(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            chunk_concurrency: default_chunk_concurrency(),
            content_poll_interval_secs: default_poll_interval_secs(),
            primary_audio_interval_minutes: default_audio_interval_minutes(),
            other_audio_interval_minutes: default_audio_interval_minutes(),
            tts_char_limit: default_tts_char_limit(),
            primary_language: default_primary_language(),
            display_language: default_primary_language(),
            bind_addr: default_bind_addr(),
            cpm: HashMap::new(),
        }
    }
}

/// Empirical narration speed per language, characters per minute.
const DEFAULT_CPM: &[(&str, u32)] = &[
    ("vietnamese", 1500),
    ("english", 800),
    ("chinese", 400),
    ("japanese", 450),
    ("korean", 500),
];

const FALLBACK_CPM: u32 = 750;

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = toml::from_str(&contents).map_err(|e| {
                    ScriptcastError::Config(format!(
                        "failed to parse {}: {e}",
                        config_path.display()
                    ))
                })?;
            }
        }

        // Environment variables win over the file.
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.openai_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.openai_base_url = Some(url);
        }
        if let Ok(key) = std::env::var("TTS_API_KEY") {
            config.tts_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("TTS_BASE_URL") {
            config.tts_base_url = Some(url);
        }
        if let Ok(path) = std::env::var("LOCAL_AUDIO_OUTPUT_PATH") {
            config.audio_root = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("FFMPEG_PATH") {
            config.ffmpeg_path = path;
        }
        if let Ok(path) = std::env::var("VOICE_CONFIG_FILE") {
            config.voice_config_file = PathBuf::from(path);
        }
        if let Ok(n) = std::env::var("MAX_CONCURRENT_TASKS") {
            if let Ok(n) = n.parse() {
                config.max_concurrent_tasks = n;
            }
        }
        if let Ok(n) = std::env::var("AUDIO_MAX_CONCURRENT_CHUNKS") {
            if let Ok(n) = n.parse() {
                config.chunk_concurrency = n;
            }
        }
        if let Ok(n) = std::env::var("VI_AUDIO_INTERVAL_MINUTES") {
            if let Ok(n) = n.parse() {
                config.primary_audio_interval_minutes = n;
            }
        }
        if let Ok(n) = std::env::var("OTHER_AUDIO_INTERVAL_MINUTES") {
            if let Ok(n) = n.parse() {
                config.other_audio_interval_minutes = n;
            }
        }
        if let Ok(n) = std::env::var("TTS_CHUNK_CHAR_LIMIT") {
            if let Ok(n) = n.parse::<usize>() {
                config.tts_char_limit = n.clamp(500, 3800);
            }
        }
        if let Ok(addr) = std::env::var("SCRIPTCAST_BIND") {
            config.bind_addr = addr;
        }

        Ok(config)
    }

    /// Validate the pieces the content worker and intake API need.
    pub fn validate_llm(&self) -> Result<()> {
        if self.openai_api_key.is_none() {
            return Err(ScriptcastError::Config(
                "OPENAI_API_KEY not set".to_string(),
            ));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(ScriptcastError::Config(
                "max_concurrent_tasks must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Characters-per-minute for a language: overrides first (exact then
    /// partial match), then built-in table, then the fallback.
    pub fn cpm_for(&self, language: &str) -> u32 {
        let lang = language.to_lowercase();

        for (key, value) in &self.cpm {
            if key.to_lowercase() == lang {
                return *value;
            }
        }
        for (key, value) in &self.cpm {
            if key.to_lowercase().contains(&lang) {
                return *value;
            }
        }
        for (key, value) in DEFAULT_CPM {
            if *key == lang {
                return *value;
            }
        }
        for (key, value) in DEFAULT_CPM {
            if key.contains(&lang.as_str()) {
                return *value;
            }
        }
        FALLBACK_CPM
    }

    pub fn content_poll_interval(&self) -> Duration {
        Duration::from_secs(self.content_poll_interval_secs)
    }

    pub fn primary_audio_interval(&self) -> Duration {
        Duration::from_secs(self.primary_audio_interval_minutes * 60)
    }

    pub fn other_audio_interval(&self) -> Duration {
        Duration::from_secs(self.other_audio_interval_minutes * 60)
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("scriptcast").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_concurrent_tasks, 2);
        assert_eq!(config.chunk_concurrency, 4);
        assert_eq!(config.tts_char_limit, 3500);
        assert_eq!(config.primary_language, "Vietnamese");
    }

    #[test]
    fn test_cpm_lookup() {
        let config = Config::default();
        assert_eq!(config.cpm_for("Vietnamese"), 1500);
        assert_eq!(config.cpm_for("english"), 800);
        assert_eq!(config.cpm_for("Chinese"), 400);
        assert_eq!(config.cpm_for("Klingon"), 750);
    }

    #[test]
    fn test_cpm_override_wins() {
        let mut config = Config::default();
        config.cpm.insert("English".to_string(), 900);
        assert_eq!(config.cpm_for("english"), 900);
        assert_eq!(config.cpm_for("Vietnamese"), 1500);
    }

    #[test]
    fn test_validate_llm_requires_key() {
        let mut config = Config::default();
        assert!(config.validate_llm().is_err());
        config.openai_api_key = Some("test-key".to_string());
        assert!(config.validate_llm().is_ok());
    }
}
