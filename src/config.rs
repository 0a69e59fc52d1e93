//! Persisted lighting settings
//!
//! Handles loading, validation and saving of the JSON settings file, by
//! default `~/.config/jsaux-rgb/settings.json`. Only effect, speed,
//! brightness and colour survive a restart; power is deliberately left out
//! so the dock always comes back lit.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::state::{
    clamp_brightness, clamp_speed, DesiredState, Effect, Rgb, DEFAULT_COLOUR, ZONE_COUNT,
};

// ============================================================================
// Constants
// ============================================================================

/// Default config directory name
const CONFIG_DIR: &str = "jsaux-rgb";

/// Default settings file name
const SETTINGS_FILE: &str = "settings.json";

// ============================================================================
// Settings record
// ============================================================================

/// Persisted colour, applied to every zone on load
///
/// Channels are read as wide integers so a hand-edited value outside
/// 0-255 is clamped instead of rejecting the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColourSetting {
    pub r: i64,
    pub g: i64,
    pub b: i64,
}

impl Default for ColourSetting {
    fn default() -> Self {
        DEFAULT_COLOUR.into()
    }
}

impl From<Rgb> for ColourSetting {
    fn from(rgb: Rgb) -> Self {
        Self {
            r: i64::from(rgb.r),
            g: i64::from(rgb.g),
            b: i64::from(rgb.b),
        }
    }
}

impl From<ColourSetting> for Rgb {
    fn from(colour: ColourSetting) -> Self {
        Rgb::clamped(colour.r, colour.g, colour.b)
    }
}

/// Lighting settings as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Effect code (default: 1, static)
    #[serde(default = "default_effect")]
    pub effect: i64,

    /// Effect speed 1-4 (default: 1)
    #[serde(default = "default_speed")]
    pub speed: i64,

    /// Colour scaling 0.0-1.0 (default: 1.0)
    #[serde(default = "default_brightness")]
    pub brightness: f64,

    /// Colour for all zones (default: teal)
    #[serde(default)]
    pub colour: ColourSetting,

    /// Settings file path (not serialized)
    #[serde(skip)]
    pub settings_path: Option<PathBuf>,
}

fn default_effect() -> i64 { i64::from(Effect::Static.code()) }
fn default_speed() -> i64 { 1 }
fn default_brightness() -> f64 { 1.0 }

impl Default for Settings {
    fn default() -> Self {
        Self {
            effect: default_effect(),
            speed: default_speed(),
            brightness: default_brightness(),
            colour: ColourSetting::default(),
            settings_path: None,
        }
    }
}

impl Settings {
    /// Get the default config directory path
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR))
    }

    /// Get the default settings file path
    pub fn default_settings_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|p| p.join(SETTINGS_FILE))
    }

    /// Load settings from the default location
    ///
    /// Returns defaults if the file doesn't exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_settings_path() {
            Some(path) => Self::load(&path),
            None => {
                tracing::warn!("Could not determine config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load settings from file path
    ///
    /// Returns defaults if the file doesn't exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!(path = %path.display(), "Settings file not found, using defaults");
            let mut settings = Self::default();
            settings.settings_path = Some(path.to_path_buf());
            return Ok(settings);
        }

        let contents = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        let mut settings: Settings =
            serde_json::from_str(&contents).map_err(ConfigError::ParseError)?;

        settings.validate();
        settings.settings_path = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            effect = settings.effect,
            speed = settings.speed,
            brightness = settings.brightness,
            "Settings loaded"
        );

        Ok(settings)
    }

    /// Save settings to file
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = match &self.settings_path {
            Some(p) => p.clone(),
            None => Self::default_settings_path()
                .ok_or_else(|| ConfigError::ValidationError("No settings path".to_string()))?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }

        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::ParseError)?;
        fs::write(&path, contents).map_err(ConfigError::IoError)?;

        tracing::debug!(path = %path.display(), "Settings saved");
        Ok(())
    }

    /// Clamp values into range and replace unknown effect codes
    pub fn validate(&mut self) {
        if effect_from_code(self.effect).is_none() {
            tracing::warn!(effect = self.effect, "Unknown effect code in settings, using static");
            self.effect = default_effect();
        }
        self.speed = i64::from(clamp_speed(self.speed));
        self.brightness = clamp_brightness(self.brightness);
        self.colour = Rgb::from(self.colour).into();
    }

    /// Desired state seeded from these settings. Power always starts on.
    pub fn to_desired_state(&self) -> DesiredState {
        DesiredState {
            power: true,
            effect: effect_from_code(self.effect).unwrap_or_default(),
            speed: clamp_speed(self.speed),
            brightness: clamp_brightness(self.brightness),
            zones: [self.colour.into(); ZONE_COUNT],
        }
    }

    /// Copy the persisted fields of `state` into these settings
    pub fn update_from_state(&mut self, state: &DesiredState) {
        self.effect = i64::from(state.effect.code());
        self.speed = i64::from(state.speed);
        self.brightness = state.brightness;
        self.colour = state.colour().into();
    }
}

fn effect_from_code(code: i64) -> Option<Effect> {
    u8::try_from(code).ok().and_then(Effect::from_code)
}

// ============================================================================
// Persistence bridge
// ============================================================================

/// Durable storage for the last successfully applied state
pub trait Persistence: Send {
    fn commit(&mut self, state: &DesiredState) -> Result<(), ConfigError>;
}

impl Persistence for Settings {
    fn commit(&mut self, state: &DesiredState) -> Result<(), ConfigError> {
        self.update_from_state(state);
        self.save()
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration error type
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading/writing file
    IoError(std::io::Error),
    /// JSON parsing error
    ParseError(serde_json::Error),
    /// Validation error
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "I/O error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(e) => Some(e),
            ConfigError::ValidationError(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
