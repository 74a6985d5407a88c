use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub api: ApiConfig,
    pub query: QueryConfig,
    pub cache: CacheConfig,
    pub refresh: RefreshConfig,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    pub endpoint: String,
    pub request_timeout_secs: u64,
    /// Zero disables client-side pacing.
    pub requests_per_second: u32,
    pub max_pages: u32,
    pub max_bytes: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    pub area_type: String,
    pub format: DatasetFormat,
    pub profile: SchemaVersion,
}

/// Datasets written by one refresh; the cache must hold all of them at once.
pub const MIN_CACHE_THRESHOLD: usize = 2;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    pub default_timeout_secs: u64,
    pub threshold: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RefreshConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind: String,
    pub default_area: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Encoding requested from the upstream API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    #[default]
    Json,
    Csv,
}

impl DatasetFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetFormat::Json => "json",
            DatasetFormat::Csv => "csv",
        }
    }
}

impl std::fmt::Display for DatasetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DatasetFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(DatasetFormat::Json),
            "csv" => Ok(DatasetFormat::Csv),
            other => Err(format!("unknown format '{}', expected json or csv", other)),
        }
    }
}

/// Generation of upstream field names used to build query structures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    #[default]
    V1,
    Legacy,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        // Load default configuration
        builder = builder.add_source(config::Config::try_from(&Config::default())?);

        // Layer on config file if it exists
        if Path::new("config.toml").exists() {
            builder = builder.add_source(File::with_name("config"));
        }

        // Layer on environment variables (TRENDS_ prefix)
        builder = builder.add_source(
            Environment::with_prefix("TRENDS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let settings: Config = config.try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.endpoint.is_empty() {
            return Err(ConfigError::Message("api.endpoint is required".into()));
        }

        if self.api.request_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "api.request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.api.max_pages == 0 {
            return Err(ConfigError::Message(
                "api.max_pages must be greater than 0".into(),
            ));
        }

        if self.query.area_type.is_empty() {
            return Err(ConfigError::Message("query.area_type is required".into()));
        }

        if self.cache.threshold < MIN_CACHE_THRESHOLD {
            return Err(ConfigError::Message(format!(
                "cache.threshold must be at least {}",
                MIN_CACHE_THRESHOLD
            )));
        }

        if self.refresh.interval_secs == 0 {
            return Err(ConfigError::Message(
                "refresh.interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                endpoint: "https://api.coronavirus.data.gov.uk/v1/data".to_string(),
                request_timeout_secs: 10,
                requests_per_second: 5,
                max_pages: 1000,
                max_bytes: 512 * 1024 * 1024,
            },
            query: QueryConfig {
                area_type: "region".to_string(),
                format: DatasetFormat::Csv,
                profile: SchemaVersion::V1,
            },
            cache: CacheConfig {
                default_timeout_secs: 300,
                threshold: 5,
            },
            refresh: RefreshConfig { interval_secs: 60 },
            server: ServerConfig {
                bind: "0.0.0.0:8050".to_string(),
                default_area: "London".to_string(),
            },
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
                log_format: LogFormat::Pretty,
                metrics_enabled: false,
                metrics_port: 9090,
            },
        }
    }
}
