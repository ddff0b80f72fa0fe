//! Configuration management for ShuttleMIDI
//!
//! Handles loading, validating and saving the YAML settings file. A missing
//! file is created with defaults on first run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::dispatcher::DispatchSettings;
use crate::session::SessionSettings;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub device: DeviceConfig,
}

/// MIDI output configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct MidiConfig {
    /// Output port name (substring match)
    #[serde(default = "default_output_port")]
    pub output_port: String,
    /// MIDI channel (0-15)
    #[serde(default)]
    pub channel: u8,
}

/// Repeat behaviour for held controls
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DispatchConfig {
    #[serde(default = "default_repeat_interval_ms")]
    pub repeat_interval_ms: u64,
    #[serde(default = "default_repeat_budget")]
    pub repeat_budget: u32,
}

/// ShuttleXpress polling
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DeviceConfig {
    #[serde(default = "default_read_slice_ms")]
    pub read_slice_ms: u64,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            output_port: default_output_port(),
            channel: 0,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            repeat_interval_ms: default_repeat_interval_ms(),
            repeat_budget: default_repeat_budget(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            read_slice_ms: default_read_slice_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load the configuration, writing the defaults first if the file does
    /// not exist yet. The flag tells whether the file was created.
    pub async fn load_or_create(path: impl AsRef<Path>) -> Result<(Self, bool)> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            return Ok((Self::load(path).await?, false));
        }

        let config = Self::default();
        config.save(path).await?;
        Ok((config, true))
    }

    /// Save configuration to file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration for correctness
    pub fn validate(&self) -> Result<()> {
        if self.midi.output_port.trim().is_empty() {
            anyhow::bail!("MIDI output_port cannot be empty");
        }
        if self.midi.channel > 15 {
            anyhow::bail!(
                "MIDI channel {} is invalid (must be 0-15)",
                self.midi.channel
            );
        }
        if self.dispatch.repeat_interval_ms == 0 {
            anyhow::bail!("dispatch.repeat_interval_ms must be greater than 0");
        }
        if self.dispatch.repeat_budget == 0 {
            anyhow::bail!("dispatch.repeat_budget must be greater than 0");
        }
        if self.device.read_slice_ms == 0 {
            anyhow::bail!("device.read_slice_ms must be greater than 0");
        }

        Ok(())
    }

    /// Pipeline settings derived from this configuration
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            dispatch: DispatchSettings {
                repeat_interval: Duration::from_millis(self.dispatch.repeat_interval_ms),
                repeat_budget: self.dispatch.repeat_budget,
            },
            read_slice: Duration::from_millis(self.device.read_slice_ms),
        }
    }
}

// Default value functions
fn default_output_port() -> String { "ShuttleMIDI".to_string() }
fn default_repeat_interval_ms() -> u64 { 100 }
fn default_repeat_budget() -> u32 { crate::dispatcher::MAX_REPEAT }
fn default_read_slice_ms() -> u64 { 250 }
