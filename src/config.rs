//! Activation settings loaded from `UserConfig.txt`.
//!
//! Layered load order, later wins:
//! 1. The vendor-format `UserConfig.txt` file.
//! 2. Environment variables prefixed with `SKYFEED_`.
//!
//! The default search probes the working directory and then its parent,
//! matching where field tools historically leave the file relative to the
//! binary. Validation runs after extraction so a structurally readable but
//! unusable file fails fast with a field-level error.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use figment::providers::Env;
use figment::value::{Dict, Map, Value};
use figment::{Error as FigmentError, Figment, Metadata, Profile, Provider};
use serde::Deserialize;
use thiserror::Error;

use crate::vehicle::AppCredentials;

/// Environment prefix for configuration overrides.
pub const ENV_PREFIX: &str = "SKYFEED_";

/// Longest accepted application key.
pub const MAX_APP_KEY_LEN: usize = 64;

/// Paths probed by [`UserConfig::load_default`], in order.
const DEFAULT_SEARCH: [&str; 2] = ["UserConfig.txt", "../UserConfig.txt"];

/// Keys parsed as unsigned integers instead of strings.
const NUMERIC_KEYS: [&str; 2] = ["app_id", "baud_rate"];

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read, parsed, or extracted.
    #[error("cannot load configuration: {0}")]
    Load(#[from] FigmentError),
    /// No configuration file was found in any searched location.
    #[error("no configuration file found (searched {0:?})")]
    NotFound(Vec<PathBuf>),
    /// A required field is absent or carries its zero value.
    #[error("required configuration field `{0}` is missing, empty, or zero")]
    MissingField(&'static str),
    /// A field is present but unusable.
    #[error("configuration field `{field}` is invalid: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was refused.
        reason: String,
    },
}

/// Activation and link settings, as read from `UserConfig.txt`.
///
/// The file is the vendor's `key : value` format, one pair per line.
/// Lines without a colon, comment lines, and unknown keys are ignored;
/// a key repeated later in the file wins:
///
/// ```text
/// app_name : skyfeed-demo
/// app_id : 1100001
/// app_key : 0123456789abcdef0123456789abcdef
/// app_license :
/// serial_device : /dev/ttyUSB0
/// baud_rate : 230400
/// ```
///
/// Every key can be overridden from the environment with the `SKYFEED_`
/// prefix, e.g. `SKYFEED_SERIAL_DEVICE=/dev/ttyACM0`.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Human-readable application name, used only for logging.
    pub app_name: String,
    /// Registered application id. Required, nonzero.
    pub app_id: u32,
    /// Application key bound to `app_id`. Required.
    pub app_key: String,
    /// Optional feature license blob.
    pub app_license: Option<String>,
    /// Serial device of the flight-controller link. Required.
    pub serial_device: String,
    /// Serial link speed in baud. Required, nonzero.
    pub baud_rate: u32,
}

impl fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserConfig")
            .field("app_name", &self.app_name)
            .field("app_id", &self.app_id)
            .field("app_key", &"<redacted>")
            .field("app_license", &self.app_license.as_ref().map(|_| "<redacted>"))
            .field("serial_device", &self.serial_device)
            .field("baud_rate", &self.baud_rate)
            .finish()
    }
}

impl UserConfig {
    /// Loads configuration from `path`, applies environment overrides, and
    /// validates the result.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(UserConfigFile::new(path))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from the first `UserConfig.txt` found in the
    /// default search locations.
    pub fn load_default() -> Result<Self, ConfigError> {
        for candidate in DEFAULT_SEARCH {
            let candidate = Path::new(candidate);
            if candidate.exists() {
                return Self::load_from(candidate);
            }
        }
        Err(ConfigError::NotFound(
            DEFAULT_SEARCH.iter().map(PathBuf::from).collect(),
        ))
    }

    /// Checks that every field needed for activation is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_id == 0 {
            return Err(ConfigError::MissingField("app_id"));
        }
        if self.app_key.trim().is_empty() {
            return Err(ConfigError::MissingField("app_key"));
        }
        if self.app_key.len() > MAX_APP_KEY_LEN {
            return Err(ConfigError::InvalidField {
                field: "app_key",
                reason: format!("exceeds {MAX_APP_KEY_LEN} characters"),
            });
        }
        if self.serial_device.trim().is_empty() {
            return Err(ConfigError::MissingField("serial_device"));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::MissingField("baud_rate"));
        }
        Ok(())
    }

    /// The credentials to present during vehicle activation. An empty or
    /// whitespace license reads as no license.
    pub fn credentials(&self) -> AppCredentials {
        AppCredentials {
            app_id: self.app_id,
            app_key: self.app_key.clone(),
            app_license: self
                .app_license
                .as_deref()
                .map(str::trim)
                .filter(|license| !license.is_empty())
                .map(str::to_string),
            serial_device: self.serial_device.clone(),
            baud_rate: self.baud_rate,
        }
    }
}

/// Figment provider for the vendor's `key : value` file format.
struct UserConfigFile {
    path: PathBuf,
}

impl UserConfigFile {
    fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Provider for UserConfigFile {
    fn metadata(&self) -> Metadata {
        Metadata::named(format!("UserConfig file ({})", self.path.display()))
    }

    fn data(&self) -> Result<Map<Profile, Dict>, FigmentError> {
        let contents = fs::read_to_string(&self.path).map_err(|e| {
            FigmentError::from(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let mut dict = Dict::new();
        for line in contents.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() || key.starts_with('#') {
                continue;
            }
            let entry = if NUMERIC_KEYS.contains(&key) {
                let number: u64 = value.parse().map_err(|_| {
                    FigmentError::from(format!(
                        "`{key}` must be an unsigned integer, got `{value}`"
                    ))
                })?;
                Value::from(number)
            } else {
                Value::from(value)
            };
            dict.insert(key.to_string(), entry);
        }
        let mut data = Map::new();
        data.insert(Profile::Default, dict);
        Ok(data)
    }
}
