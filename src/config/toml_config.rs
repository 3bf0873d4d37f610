use crate::utils::error::{Result, ReviewError};
use crate::utils::validation::{
    validate_path, validate_positive_number, validate_required_field, validate_url, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

pub const DEFAULT_SCRAPER_TIMEOUT_SECONDS: u64 = 180;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Raw service configuration as read from TOML or the environment.
///
/// Every field is optional at this stage; [`ServiceConfig::resolve`] decides
/// what is required and fails on the first missing or invalid value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub snapshot: Option<SnapshotConfig>,
    #[serde(default)]
    pub scraper: ScraperConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    pub slots: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    pub capacity: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub endpoint: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Validated settings the application is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub slots: usize,
    pub queue_capacity: usize,
    pub cache_ttl: Duration,
    /// `None` keeps snapshots in memory.
    pub snapshot_dir: Option<PathBuf>,
    pub scraper_endpoint: String,
    pub scraper_timeout: Duration,
}

impl ServiceConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(ReviewError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// Parses TOML, substituting `${VAR}` references from the environment first.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| ReviewError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Unknown variables are left untouched so validation can report them.
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR_RE
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    /// Reads `PARSER_WORKERS`, `PARSER_QUEUE_MAX`, `CACHE_TTL_SECONDS`,
    /// `SNAPSHOT_DIR`, `SCRAPER_ENDPOINT` and `SCRAPER_TIMEOUT_SECONDS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |name: &str| -> Result<Option<u64>> {
            match lookup(name) {
                None => Ok(None),
                Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
                    ReviewError::InvalidConfigValueError {
                        field: name.to_string(),
                        value: raw.clone(),
                        reason: "Expected a non-negative integer".to_string(),
                    }
                }),
            }
        };

        Ok(Self {
            pool: PoolConfig {
                slots: number("PARSER_WORKERS")?,
            },
            queue: QueueConfig {
                capacity: number("PARSER_QUEUE_MAX")?,
            },
            cache: CacheConfig {
                ttl_seconds: number("CACHE_TTL_SECONDS")?,
            },
            snapshot: lookup("SNAPSHOT_DIR").map(|directory| SnapshotConfig {
                directory: Some(directory),
            }),
            scraper: ScraperConfig {
                endpoint: lookup("SCRAPER_ENDPOINT"),
                timeout_seconds: number("SCRAPER_TIMEOUT_SECONDS")?,
            },
        })
    }

    /// Checks every value and produces [`Settings`].
    pub fn resolve(&self) -> Result<Settings> {
        let slots = *validate_required_field("pool.slots", &self.pool.slots)?;
        validate_positive_number("pool.slots", slots, 1)?;

        let capacity = *validate_required_field("queue.capacity", &self.queue.capacity)?;
        validate_positive_number("queue.capacity", capacity, 1)?;

        let ttl = *validate_required_field("cache.ttl_seconds", &self.cache.ttl_seconds)?;
        validate_positive_number("cache.ttl_seconds", ttl, 1)?;

        let endpoint = validate_required_field("scraper.endpoint", &self.scraper.endpoint)?;
        validate_url("scraper.endpoint", endpoint)?;

        let timeout = self
            .scraper
            .timeout_seconds
            .unwrap_or(DEFAULT_SCRAPER_TIMEOUT_SECONDS);
        validate_positive_number("scraper.timeout_seconds", timeout, 1)?;

        let snapshot_dir = match self.snapshot.as_ref().and_then(|s| s.directory.as_ref()) {
            Some(directory) => {
                validate_path("snapshot.directory", directory)?;
                Some(PathBuf::from(directory))
            }
            None => None,
        };

        Ok(Settings {
            slots: to_usize("pool.slots", slots)?,
            queue_capacity: to_usize("queue.capacity", capacity)?,
            cache_ttl: Duration::from_secs(ttl),
            snapshot_dir,
            scraper_endpoint: endpoint.clone(),
            scraper_timeout: Duration::from_secs(timeout),
        })
    }
}

fn to_usize(field: &str, value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| ReviewError::InvalidConfigValueError {
        field: field.to_string(),
        value: value.to_string(),
        reason: "Value is too large for this platform".to_string(),
    })
}

impl Validate for ServiceConfig {
    fn validate(&self) -> Result<()> {
        self.resolve().map(|_| ())
    }
}
