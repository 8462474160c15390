use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration: defaults, then an optional TOML file named by
/// `ROLLCALL_CONFIG`, then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Bind host (default: 127.0.0.1).
    pub host: String,
    /// Bind port (default: 5000).
    pub port: u16,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance below which a probe matches an enrolled face.
    pub match_threshold: f32,
    /// Descriptor samples required when registering from raw samples.
    pub min_samples: usize,
    /// Day boundary offset from UTC, in minutes east.
    pub utc_offset_minutes: i32,
    /// Must be set to bind on a non-loopback host.
    pub allow_public_bind: bool,
    /// Request body ceiling in bytes.
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            db_path: rollcall_store::default_db_path(),
            match_threshold: rollcall_core::DEFAULT_MATCH_THRESHOLD,
            min_samples: rollcall_core::DEFAULT_MIN_SAMPLES,
            utc_offset_minutes: 0,
            allow_public_bind: false,
            max_body_bytes: 64 * 1024,
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the environment.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(&lookup);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("ROLLCALL_HOST") {
            self.host = host;
        }
        if let Some(path) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        self.port = env_parse(lookup, "ROLLCALL_PORT", self.port);
        self.match_threshold = env_parse(lookup, "ROLLCALL_MATCH_THRESHOLD", self.match_threshold);
        self.min_samples = env_parse(lookup, "ROLLCALL_MIN_SAMPLES", self.min_samples);
        self.utc_offset_minutes =
            env_parse(lookup, "ROLLCALL_UTC_OFFSET_MINUTES", self.utc_offset_minutes);
        self.max_body_bytes = env_parse(lookup, "ROLLCALL_MAX_BODY_BYTES", self.max_body_bytes);
        if let Some(v) = lookup("ROLLCALL_ALLOW_PUBLIC_BIND") {
            self.allow_public_bind = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "match_threshold must be a positive number, got {}",
                self.match_threshold
            )));
        }
        if self.min_samples == 0 {
            return Err(ConfigError::Invalid("min_samples must be at least 1".into()));
        }
        self.utc_offset()?;
        if !self.is_localhost() && !self.allow_public_bind {
            return Err(ConfigError::Invalid(format!(
                "refusing to bind non-loopback host {} without ROLLCALL_ALLOW_PUBLIC_BIND=1",
                self.host
            )));
        }
        Ok(())
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        rollcall_core::clock::offset_from_minutes(self.utc_offset_minutes).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_localhost(&self) -> bool {
        matches!(
            self.host.as_str(),
            "127.0.0.1" | "::1" | "localhost" | "[::1]"
        )
    }
}

fn env_parse<T: FromStr + Copy>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    current: T,
) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            current
        }),
        None => current,
    }
}
