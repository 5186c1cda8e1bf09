//! Reduction engine configuration.
//!
//! Loads [`ReductionConfig`] from a TOML file (`clreduce.toml`) with
//! environment variable overrides via `CLREDUCE_*` prefixed variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Preprocessor names owned by kernel specialization. User build options must
/// not redefine them.
const RESERVED_DEFINES: &[&str] =
    &["OP_ADD", "OP_MUL", "OP_MIN", "OP_MAX", "TYPE", "DOUBLE_FP"];

/// Engine configuration loaded from TOML with environment variable overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    /// Upper bound on the execution-group size (0 = use the kernel's
    /// negotiated maximum).
    /// Override: `CLREDUCE_MAX_GROUP_SIZE`
    pub max_group_size: u32,

    /// Extra compiler options appended after the specialization defines,
    /// e.g. `-cl-mad-enable`.
    /// Override: `CLREDUCE_BUILD_OPTIONS`
    pub build_options: String,

    /// Replacement reduction kernel template. When unset the embedded
    /// template is used.
    /// Override: `CLREDUCE_KERNEL_SOURCE` (empty clears it)
    pub kernel_source: Option<PathBuf>,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            max_group_size: 0,
            build_options: String::new(),
            kernel_source: None,
        }
    }
}

/// Errors that can occur when loading or validating a [`ReductionConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride {
        key: String,
        value: String,
        reason: String,
    },
}

impl ReductionConfig {
    /// Render the default configuration as TOML.
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields, then apply environment variable overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut cfg: ReductionConfig = toml::from_str(toml_str)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load only from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check the group size cap, user build options and template path.
    ///
    /// Engines run this on every config they are given, so configs built as
    /// struct literals are checked too.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_group_size != 0
            && (self.max_group_size < 2 || !self.max_group_size.is_power_of_two())
        {
            return Err(ConfigError::Validation(format!(
                "max_group_size must be 0 or a power of two >= 2, got {}",
                self.max_group_size
            )));
        }

        for token in self.build_options.split_whitespace() {
            let define = token.strip_prefix("-D").unwrap_or(token);
            let name = define.split('=').next().unwrap_or(define);
            if RESERVED_DEFINES.contains(&name) {
                return Err(ConfigError::Validation(format!(
                    "build_options must not redefine {name}; it is set by kernel specialization"
                )));
            }
        }

        if let Some(path) = &self.kernel_source {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(
                    "kernel_source must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    /// Apply `CLREDUCE_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("CLREDUCE_MAX_GROUP_SIZE") {
            match val.parse::<u32>() {
                Ok(size) => self.max_group_size = size,
                Err(e) => {
                    return Err(ConfigError::EnvOverride {
                        key: "CLREDUCE_MAX_GROUP_SIZE".into(),
                        value: val,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Ok(val) = std::env::var("CLREDUCE_BUILD_OPTIONS") {
            self.build_options = val;
        }

        if let Ok(val) = std::env::var("CLREDUCE_KERNEL_SOURCE") {
            self.kernel_source = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        Ok(())
    }
}
