//! Configuration management for the LPD8 driver
//!
//! Handles loading, parsing and validation of the YAML configuration file.
//! Every field has a default, so a file only needs the values it changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::pacing::{DEFAULT_POLL_INTERVAL, DEFAULT_WRITE_INTERVAL};

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// MIDI port configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct MidiConfig {
    /// Port name pattern (case-insensitive substring match)
    #[serde(default = "default_port")]
    pub port: String,
    /// Channel (0-15) used when lighting pads
    #[serde(default = "default_note_channel")]
    pub note_channel: u8,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            note_channel: default_note_channel(),
        }
    }
}

/// Device session behaviour
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SessionConfig {
    /// Renumber ambiguous triggers at setup instead of failing
    #[serde(default = "default_true")]
    pub auto_fix_ambiguity: bool,
    /// Interval between active-program queries
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Minimum spacing between configuration writes
    #[serde(default = "default_write_interval")]
    pub write_interval_ms: u64,
    /// How long setup waits for each program dump
    #[serde(default = "default_dump_timeout")]
    pub dump_timeout_ms: u64,
    /// Slot numbering of the "set active program" command
    #[serde(default)]
    pub active_slot_encoding: ActiveSlotEncoding,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_fix_ambiguity: default_true(),
            poll_interval_ms: default_poll_interval(),
            write_interval_ms: default_write_interval(),
            dump_timeout_ms: default_dump_timeout(),
            active_slot_encoding: ActiveSlotEncoding::default(),
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn write_interval(&self) -> Duration {
        Duration::from_millis(self.write_interval_ms)
    }

    pub fn dump_timeout(&self) -> Duration {
        Duration::from_millis(self.dump_timeout_ms)
    }
}

/// Wire numbering of the slot byte in the "set active program" command
///
/// The dump and query commands are 1-based on the wire. Known host software
/// sends the select command 0-based, which is the default here; switch to
/// `one_based` if a unit selects the wrong slot.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActiveSlotEncoding {
    #[default]
    ZeroBased,
    OneBased,
}

impl ActiveSlotEncoding {
    /// Wire byte for a zero-based slot index
    pub fn wire_value(self, slot: usize) -> u8 {
        match self {
            ActiveSlotEncoding::ZeroBased => slot as u8,
            ActiveSlotEncoding::OneBased => slot as u8 + 1,
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        config.validate()?;

        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub async fn load_or_default(path: &str) -> Result<Self> {
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration for correctness
    pub fn validate(&self) -> Result<()> {
        if self.midi.port.trim().is_empty() {
            anyhow::bail!("MIDI port pattern cannot be empty");
        }
        if self.midi.note_channel > 15 {
            anyhow::bail!(
                "MIDI note_channel {} is invalid (must be 0-15)",
                self.midi.note_channel
            );
        }
        if self.session.poll_interval_ms == 0 {
            anyhow::bail!("session.poll_interval_ms must be greater than 0");
        }
        if self.session.write_interval_ms == 0 {
            anyhow::bail!("session.write_interval_ms must be greater than 0");
        }
        if self.session.dump_timeout_ms == 0 {
            anyhow::bail!("session.dump_timeout_ms must be greater than 0");
        }
        Ok(())
    }
}

// Default value functions
fn default_port() -> String { "LPD8".to_string() }
fn default_note_channel() -> u8 { 6 }
fn default_true() -> bool { true }
fn default_poll_interval() -> u64 { DEFAULT_POLL_INTERVAL.as_millis() as u64 }
fn default_write_interval() -> u64 { DEFAULT_WRITE_INTERVAL.as_millis() as u64 }
fn default_dump_timeout() -> u64 { 1000 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.midi.port, "LPD8");
        assert_eq!(config.midi.note_channel, 6);
        assert!(config.session.auto_fix_ambiguity);
        assert_eq!(config.session.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.session.write_interval(), Duration::from_millis(300));
        assert_eq!(config.session.dump_timeout(), Duration::from_secs(1));
        assert_eq!(config.session.active_slot_encoding, ActiveSlotEncoding::ZeroBased);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
session:
  auto_fix_ambiguity: false
  active_slot_encoding: one_based
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.midi, MidiConfig::default());
        assert!(!config.session.auto_fix_ambiguity);
        assert_eq!(config.session.write_interval_ms, 300);
        assert_eq!(config.session.active_slot_encoding, ActiveSlotEncoding::OneBased);
    }

    #[test]
    fn test_validate_rejects_bad_channel() {
        let mut config = AppConfig::default();
        config.midi.note_channel = 16;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.midi.port = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let mut config = AppConfig::default();
        config.session.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.write_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.dump_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wire_value() {
        assert_eq!(ActiveSlotEncoding::ZeroBased.wire_value(0), 0);
        assert_eq!(ActiveSlotEncoding::OneBased.wire_value(0), 1);
        assert_eq!(ActiveSlotEncoding::OneBased.wire_value(3), 4);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "midi:\n  port: \"LPD8 mk1\"\nsession:\n  poll_interval_ms: 250").unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.midi.port, "LPD8 mk1");
        assert_eq!(config.session.poll_interval_ms, 250);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "session:\n  poll_interval_ms: 0").unwrap();

        let path = file.path().to_str().unwrap().to_string();
        assert!(AppConfig::load(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.yaml");
        let config = AppConfig::load_or_default(path.to_str().unwrap()).await.unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
