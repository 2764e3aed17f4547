//! TTS provider capability, concrete providers and the voice
//! configuration table.

use crate::config::Config;
use crate::error::{Result, ScriptcastError};
use crate::llm::PROVIDER_TIMEOUT;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const POLLINATIONS_BASE_URL: &str = "https://text.pollinations.ai/";
const POLLINATIONS_URL_CHAR_LIMIT: usize = 4000;

/// Resolved voice settings for one language.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSettings {
    pub provider: String,
    pub voice_name: String,
    pub language_code: String,
    pub speaking_rate: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            voice_name: "onyx".to_string(),
            language_code: "en-US".to_string(),
            speaking_rate: 1.0,
        }
    }
}

/// One (possibly partial) entry in the voice configuration file; missing
/// fields fall back to the `__DEFAULT__` entry, then to the built-ins.
#[derive(Debug, Clone, Default, Deserialize)]
struct VoiceEntry {
    provider: Option<String>,
    voice_name: Option<String>,
    language_code: Option<String>,
    speaking_rate: Option<f32>,
}

const DEFAULT_KEY: &str = "__DEFAULT__";

/// Language-keyed voice table loaded from `VOICE_CONFIG_FILE`.
#[derive(Debug, Clone, Default)]
pub struct VoiceConfig {
    entries: HashMap<String, VoiceEntry>,
}

impl VoiceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let entries: HashMap<String, VoiceEntry> = serde_json::from_str(&contents)?;
        info!("Loaded voice configuration from {} ({} entries)", path.display(), entries.len());
        Ok(Self { entries })
    }

    /// Load, falling back to an empty table (defaults only) when the file
    /// is missing or malformed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Voice config {} unavailable ({e}), using default voice settings",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// Settings for a language: exact case-insensitive match, then partial
    /// match, then the `__DEFAULT__` entry. Missing fields always fall
    /// back to the defaults.
    pub fn resolve(&self, language: &str) -> VoiceSettings {
        let lang = language.to_lowercase();

        let entry = self
            .entries
            .iter()
            .find(|(key, _)| *key != DEFAULT_KEY && key.to_lowercase() == lang)
            .or_else(|| {
                self.entries.iter().find(|(key, _)| {
                    *key != DEFAULT_KEY && key.to_lowercase().contains(&lang)
                })
            })
            .map(|(_, entry)| entry);

        if entry.is_none() {
            debug!("No voice config match for '{language}', using defaults");
        }

        let defaults = self.entries.get(DEFAULT_KEY);
        let ultimate = VoiceSettings::default();

        let pick_string = |field: fn(&VoiceEntry) -> Option<&String>, fallback: &str| {
            entry
                .and_then(field)
                .or_else(|| defaults.and_then(field))
                .cloned()
                .unwrap_or_else(|| fallback.to_string())
        };

        VoiceSettings {
            provider: pick_string(|e| e.provider.as_ref(), &ultimate.provider),
            voice_name: pick_string(|e| e.voice_name.as_ref(), &ultimate.voice_name),
            language_code: pick_string(|e| e.language_code.as_ref(), &ultimate.language_code),
            speaking_rate: entry
                .and_then(|e| e.speaking_rate)
                .or_else(|| defaults.and_then(|e| e.speaking_rate))
                .unwrap_or(ultimate.speaking_rate),
        }
    }
}

/// Capability of turning text into MP3 bytes.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceSettings) -> Result<Vec<u8>>;

    /// Provider name for display.
    fn name(&self) -> &'static str;
}

/// OpenAI speech endpoint, or any compatible local server.
pub struct OpenAiTts {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiTts {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        })
    }
}

#[derive(serde::Serialize)]
struct SpeechRequestBody<'a> {
    model: &'static str,
    voice: &'a str,
    input: &'a str,
    speed: f32,
    response_format: &'static str,
}

#[async_trait]
impl TtsProvider for OpenAiTts {
    async fn synthesize(&self, text: &str, voice: &VoiceSettings) -> Result<Vec<u8>> {
        debug!(
            "[openai-tts] voice '{}', speed {:.2}, {} chars",
            voice.voice_name,
            voice.speaking_rate,
            text.chars().count()
        );

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&SpeechRequestBody {
                model: "tts-1",
                voice: &voice.voice_name,
                input: text,
                speed: voice.speaking_rate,
                response_format: "mp3",
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScriptcastError::Api {
                status: status.as_u16(),
                message: body.chars().take(500).collect(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Pollinations free TTS endpoint; text travels in the URL path.
pub struct PollinationsTts {
    client: reqwest::Client,
    base_url: String,
}

impl PollinationsTts {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: POLLINATIONS_BASE_URL.to_string(),
        })
    }

    /// Point at a different endpoint (local proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl TtsProvider for PollinationsTts {
    async fn synthesize(&self, text: &str, voice: &VoiceSettings) -> Result<Vec<u8>> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| ScriptcastError::Config(format!("bad Pollinations URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ScriptcastError::Config("Pollinations URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push(text);
        url.query_pairs_mut()
            .append_pair("model", "openai-audio")
            .append_pair("voice", &voice.voice_name);

        if url.as_str().len() > POLLINATIONS_URL_CHAR_LIMIT {
            warn!(
                "[pollinations] request URL ({} chars) may exceed the provider limit",
                url.as_str().len()
            );
        }

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScriptcastError::Api {
                status: status.as_u16(),
                message: body.chars().take(500).collect(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("audio/mpeg") {
            let body = response.text().await.unwrap_or_default();
            return Err(ScriptcastError::Provider(format!(
                "expected audio/mpeg, got '{content_type}': {}",
                body.chars().take(500).collect::<String>()
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }

    fn name(&self) -> &'static str {
        "pollinations"
    }
}

/// Maps voice-config provider keys to implementations.
#[derive(Clone, Default)]
pub struct TtsRegistry {
    providers: HashMap<String, Arc<dyn TtsProvider>>,
}

impl TtsRegistry {
    /// Build the standard registry from configuration. The OpenAI-compatible
    /// provider is registered under both of its config keys when a key is
    /// available.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::default();

        if let Some(api_key) = &config.tts_api_key {
            let openai: Arc<dyn TtsProvider> = Arc::new(OpenAiTts::new(
                api_key.clone(),
                config.tts_base_url.clone(),
            )?);
            registry.register("openai", openai.clone());
            registry.register("local_tts", openai);
        } else {
            warn!("TTS_API_KEY not set; the OpenAI-compatible provider is unavailable");
        }

        registry.register("pollinations", Arc::new(PollinationsTts::new()?));
        Ok(registry)
    }

    pub fn register(&mut self, key: &str, provider: Arc<dyn TtsProvider>) {
        self.providers.insert(key.to_lowercase(), provider);
    }

    /// Unknown providers are a configuration error, never retried.
    pub fn get(&self, key: &str) -> Result<Arc<dyn TtsProvider>> {
        self.providers
            .get(&key.to_lowercase())
            .cloned()
            .ok_or_else(|| {
                ScriptcastError::Config(format!("unsupported TTS provider: '{key}'"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> VoiceConfig {
        let json = r#"{
            "__DEFAULT__": {"provider": "openai", "voice_name": "onyx", "language_code": "en-US", "speaking_rate": 1.0},
            "Vietnamese": {"provider": "pollinations", "voice_name": "nova", "language_code": "vi-VN"},
            "Japanese Kansai": {"voice_name": "sakura", "language_code": "ja-JP", "speaking_rate": 0.9}
        }"#;
        VoiceConfig {
            entries: serde_json::from_str(json).unwrap(),
        }
    }

    #[test]
    fn test_exact_match_case_insensitive() {
        let config = sample_config();
        let settings = config.resolve("vietnamese");
        assert_eq!(settings.provider, "pollinations");
        assert_eq!(settings.voice_name, "nova");
        assert_eq!(settings.language_code, "vi-VN");
        // speaking_rate missing on the entry, inherited from __DEFAULT__
        assert_eq!(settings.speaking_rate, 1.0);
    }

    #[test]
    fn test_partial_match() {
        let config = sample_config();
        let settings = config.resolve("Japanese");
        assert_eq!(settings.voice_name, "sakura");
        // provider missing on the entry, inherited from __DEFAULT__
        assert_eq!(settings.provider, "openai");
    }

    #[test]
    fn test_unknown_language_gets_defaults() {
        let config = sample_config();
        let settings = config.resolve("Swahili");
        assert_eq!(settings.provider, "openai");
        assert_eq!(settings.voice_name, "onyx");
    }

    #[test]
    fn test_empty_config_gets_ultimate_defaults() {
        let config = VoiceConfig::default();
        let settings = config.resolve("English");
        assert_eq!(settings, VoiceSettings::default());
    }

    #[test]
    fn test_registry_unknown_provider() {
        let registry = TtsRegistry::default();
        assert!(matches!(
            registry.get("google"),
            Err(ScriptcastError::Config(_))
        ));
    }
}
