//! Configuration management for vsurf
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files, with environment variable overrides applied on top.
//! It covers the readback strategy, surface storage mode and diagnostics.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration struct containing all vsurf settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct VsurfConfig {
    /// Pixel readback strategy
    #[serde(default)]
    pub readback: ReadbackConfig,

    /// Off-screen surface storage
    #[serde(default)]
    pub surface: SurfaceConfig,

    /// Logging and test hooks
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// How pixels are transferred from the off-screen surface to host memory
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReadbackMode {
    /// Staged transfer through a pixel buffer object, demoted to
    /// synchronous transfer if it turns out not to overlap
    Pbo,
    /// Direct synchronous transfer into the destination
    Sync,
    /// No readback at all
    None,
}

impl ReadbackMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pbo" => Some(ReadbackMode::Pbo),
            "sync" => Some(ReadbackMode::Sync),
            "none" => Some(ReadbackMode::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReadbackConfig {
    /// Readback strategy
    pub mode: ReadbackMode,

    /// The transport was told to include an alpha channel. Only used to
    /// phrase hints when staged readback gets demoted.
    pub force_alpha: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Back every surface with a 1x1 anchor pbuffer plus a framebuffer
    /// object holding one renderbuffer per logical buffer, instead of a
    /// native multi-buffer pbuffer
    pub emulate_multibuffer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Print one-time notices about readback behavior
    pub verbose: bool,

    /// Publish uniform frame colors to the autotest slots
    pub autotest: bool,

    /// Log readback throughput periodically
    pub profile: bool,

    /// Seconds between throughput reports
    pub profile_interval_secs: f64,
}

impl Default for ReadbackConfig {
    fn default() -> Self {
        Self {
            mode: ReadbackMode::Pbo,
            force_alpha: false,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            autotest: false,
            profile: false,
            profile_interval_secs: 2.0,
        }
    }
}

impl VsurfConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            let relative = path.strip_prefix("~").unwrap_or(path);
            Path::new(&home).join(relative)
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: VsurfConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let interval = self.diagnostics.profile_interval_secs;
        if !interval.is_finite() || interval <= 0.0 {
            anyhow::bail!("Invalid profile_interval_secs: must be a positive number of seconds");
        }

        Ok(())
    }

    /// Overlay `VSURF_*` environment variables on top of this configuration
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var("VSURF_READBACK") {
            self.readback.mode = ReadbackMode::parse(&value)
                .with_context(|| format!("Invalid VSURF_READBACK value: {value}"))?;
        }
        if let Some(value) = env_flag("VSURF_FORCEALPHA")? {
            self.readback.force_alpha = value;
        }
        if let Some(value) = env_flag("VSURF_EMULATE")? {
            self.surface.emulate_multibuffer = value;
        }
        if let Some(value) = env_flag("VSURF_VERBOSE")? {
            self.diagnostics.verbose = value;
        }
        if let Some(value) = env_flag("VSURF_AUTOTEST")? {
            self.diagnostics.autotest = value;
        }
        if let Some(value) = env_flag("VSURF_PROFILE")? {
            self.diagnostics.profile = value;
        }

        self.validate()?;
        Ok(self)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Merge a partial configuration into this one
    /// Non-default sections from the partial config override this config
    pub fn merge_partial(mut self, partial: VsurfConfig) -> Self {
        let default_config = VsurfConfig::default();

        if partial.readback != default_config.readback {
            self.readback = partial.readback;
        }
        if partial.surface != default_config.surface {
            self.surface = partial.surface;
        }
        if partial.diagnostics != default_config.diagnostics {
            self.diagnostics = partial.diagnostics;
        }

        self
    }
}

fn env_flag(name: &str) -> Result<Option<bool>> {
    let value = match std::env::var(name) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => anyhow::bail!("Invalid boolean value for {name}: {value}"),
    }
}
