//! Daemon configuration
//!
//! Loaded from an optional JSON file; every field has a default so a partial
//! file is fine. Durations are milliseconds (hours for cache ageing).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use subvoxcache::{EvictionPolicy, DEFAULT_EVICT_EVERY, DEFAULT_MAX_ENTRIES};

use crate::command::CommandSpec;
use crate::error::{Error, Result};
use crate::frame::DEFAULT_REGION_FRACTION;
use crate::speech::{SpeechConfig, DEFAULT_MAX_BACKLOG, DEFAULT_SHORT_TEXT_THRESHOLD};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capture loop period
    pub period_ms: u64,
    /// Bottom fraction of the frame holding subtitles
    pub region_fraction: f32,
    /// Print results as JSON lines
    pub json_output: bool,
    /// How often the daemon logs cache statistics
    pub stats_interval_ms: u64,
    pub cache: CacheConfig,
    pub speech: SpeechSection,
    pub capture: CaptureConfig,
    pub recognizer: RecognizerConfig,
    pub translator: TranslatorConfig,
}

/// Translation cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: PathBuf,
    pub max_entries: usize,
    pub evict_every: u32,
    pub stale_after_hours: i64,
    pub min_hits_when_stale: u32,
    pub expire_after_hours: i64,
}

/// Speech queue and TTS command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSection {
    pub short_text_threshold: usize,
    pub max_backlog: usize,
    pub command: Option<CommandSpec>,
}

/// Frame capture command and frame size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub command: Option<CommandSpec>,
    pub width: u32,
    pub height: u32,
}

/// OCR command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub command: Option<CommandSpec>,
    pub timeout_ms: u64,
}

/// Translation command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    pub command: Option<CommandSpec>,
    /// Run once before capture starts
    pub prepare: Option<CommandSpec>,
    pub timeout_ms: u64,
    /// Output starting with this is an engine error
    pub error_prefix: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            period_ms: 200,
            region_fraction: DEFAULT_REGION_FRACTION,
            json_output: false,
            stats_interval_ms: 60_000,
            cache: CacheConfig::default(),
            speech: SpeechSection::default(),
            capture: CaptureConfig::default(),
            recognizer: RecognizerConfig::default(),
            translator: TranslatorConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/translations.db"),
            max_entries: DEFAULT_MAX_ENTRIES,
            evict_every: DEFAULT_EVICT_EVERY,
            stale_after_hours: 24,
            min_hits_when_stale: 3,
            expire_after_hours: 24 * 7,
        }
    }
}

impl Default for SpeechSection {
    fn default() -> Self {
        Self {
            short_text_threshold: DEFAULT_SHORT_TEXT_THRESHOLD,
            max_backlog: DEFAULT_MAX_BACKLOG,
            command: None,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            command: None,
            width: 960,
            height: 540,
        }
    }
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_ms: 2_000,
        }
    }
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            command: None,
            prepare: None,
            timeout_ms: 5_000,
            error_prefix: Some("Ошибка перевода:".to_string()),
        }
    }
}

impl Config {
    /// Read a JSON file, or the defaults when `path` is `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)?;
                serde_json::from_str(&raw)
                    .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.period_ms == 0 {
            return Err(Error::Config("period_ms must be positive".to_string()));
        }
        if !(self.region_fraction > 0.0 && self.region_fraction <= 1.0) {
            return Err(Error::Config(format!(
                "region_fraction {} outside (0, 1]",
                self.region_fraction
            )));
        }
        if self.cache.max_entries == 0 || self.cache.evict_every == 0 {
            return Err(Error::Config(
                "cache.max_entries and cache.evict_every must be positive".to_string(),
            ));
        }
        if self.cache.stale_after_hours < 0 || self.cache.expire_after_hours < 0 {
            return Err(Error::Config("cache ageing hours must not be negative".to_string()));
        }
        if self.speech.max_backlog == 0 {
            return Err(Error::Config("speech.max_backlog must be positive".to_string()));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(Error::Config("capture size must be positive".to_string()));
        }
        Ok(())
    }

    /// Capture loop period
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Cache statistics log interval
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms.max(1))
    }

    /// Eviction parameters for the translation cache
    pub fn policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            max_entries: self.cache.max_entries,
            stale_after: chrono::Duration::hours(self.cache.stale_after_hours),
            min_hits_when_stale: self.cache.min_hits_when_stale,
            expire_after: chrono::Duration::hours(self.cache.expire_after_hours),
            evict_every: self.cache.evict_every,
        }
    }

    /// Speech queue tuning
    pub fn speech_config(&self) -> SpeechConfig {
        SpeechConfig {
            short_text_threshold: self.speech.short_text_threshold,
            max_backlog: self.speech.max_backlog,
        }
    }

    /// A command the daemon cannot start without
    pub fn require<'a>(command: &'a Option<CommandSpec>, name: &str) -> Result<&'a CommandSpec> {
        command
            .as_ref()
            .ok_or_else(|| Error::Config(format!("{} is not configured", name)))
    }
}
