//! Runtime configuration.
//!
//! Stored as a TOML file. Every section and field has a default, so an empty
//! file (or no file) yields a working configuration.

use crate::extract::PeriodPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("parse config TOML: {0}")]
    Parse(String),

    #[error("serialize config: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub store_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("data_store"),
            cache_dir: PathBuf::from("cache"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .into(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Base URLs of every external source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Statistical cube API; tables are `{cube_base}/{code}/JSON-stat/2.0`.
    pub cube_base: String,
    /// Central-bank series API; series are `{series_base}/{flow}/{key}`.
    pub series_base: String,
    /// Market chart API; prices are `{market_base}/{ticker}`.
    pub market_base: String,
    /// Government bond pages; `{bond_base}/{country}/`.
    pub bond_base: String,
    pub pmi_hub: String,
    /// History tables at `{pmi_history_base}/{kind}-pmi`.
    pub pmi_history_base: String,
    pub sentiment_release: String,
    pub sentiment_history: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            cube_base: "https://ws.cso.ie/public/api.restful/PxStat.Data.Cube_API.ReadDataset"
                .into(),
            series_base: "https://data-api.ecb.europa.eu/service/data".into(),
            market_base: "https://query2.finance.yahoo.com/v8/finance/chart".into(),
            bond_base: "https://www.worldgovernmentbonds.com/country".into(),
            pmi_hub: "https://aib.ie/fxcentre/resource-centre/aib-ireland-pmis".into(),
            pmi_history_base: "https://tradingeconomics.com/ireland".into(),
            sentiment_release: "https://www.kbc.ie/about-kbc/newsroom".into(),
            sentiment_history: "https://tradingeconomics.com/ireland/consumer-confidence".into(),
        }
    }
}

/// Cache lifetimes per source family, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtlConfig {
    pub cso: u64,
    pub ecb: u64,
    pub markets: u64,
    pub bonds: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            cso: 6 * 3600,
            ecb: 3600,
            markets: 900,
            bonds: 1800,
        }
    }
}

/// Source families sharing a cache lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    Cso,
    Ecb,
    Markets,
    Bonds,
}

impl CacheTtlConfig {
    pub fn max_age(&self, class: TtlClass) -> Duration {
        Duration::from_secs(match class {
            TtlClass::Cso => self.cso,
            TtlClass::Ecb => self.ecb,
            TtlClass::Markets => self.markets,
            TtlClass::Bonds => self.bonds,
        })
    }
}

/// How much history each fetch asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsConfig {
    pub cso_months: usize,
    pub exchange_rate_days: u64,
    pub monthly_months: usize,
    pub market_days: u64,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            cso_months: 24,
            exchange_rate_days: 400,
            monthly_months: 15,
            market_days: 365,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Before this day of the month, undated readings refer to two months ago.
    pub period_threshold_day: u32,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            period_threshold_day: PeriodPolicy::default().threshold_day,
        }
    }
}

impl ScrapeConfig {
    pub fn period_policy(&self) -> PeriodPolicy {
        PeriodPolicy {
            threshold_day: self.period_threshold_day,
        }
    }
}

/// The complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconConfig {
    pub paths: PathsConfig,
    pub http: HttpConfig,
    pub sources: SourcesConfig,
    pub cache_ttl: CacheTtlConfig,
    pub windows: WindowsConfig,
    pub scrape: ScrapeConfig,
}

impl EconConfig {
    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Load `path` if it exists, otherwise the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }
}
