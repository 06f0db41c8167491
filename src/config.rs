// src/config.rs
use serde::Serialize;
use std::{env, path::PathBuf, str::FromStr, time::Duration};
use tracing::warn;

use crate::error::{Error, Result};
use crate::process::ColumnRange;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_TTL_SECS: u64 = 60;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Where derived datasets are kept between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Per-view entries that expire after a TTL.
    Ttl,
    /// One process-wide snapshot, refreshed on demand and mirrored to disk.
    Snapshot,
}

impl FromStr for CacheMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ttl" | "cache" => Ok(CacheMode::Ttl),
            "snapshot" | "persist" => Ok(CacheMode::Snapshot),
            other => Err(Error::Config(format!("unknown CACHE_MODE `{}`", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: Option<String>,
    pub api_key: Option<String>,
    /// Sent as-is on every request and never renewed. OAuth access tokens expire
    /// (usually after an hour), so bearer deployments must restart with a fresh one.
    pub access_token: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

/// Upstream ranges for the two sheets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranges {
    pub profile: String,
    pub performance_header: String,
    pub performance_data: String,
    /// Columns kept by the performance key view, besides the key itself.
    pub performance_key: ColumnRange,
}

impl Default for Ranges {
    fn default() -> Self {
        Self {
            profile: "School Profile!A:ZZ".into(),
            performance_header: "School Performance!1:3".into(),
            performance_data: "School Performance!A4:ZZ".into(),
            performance_key: ColumnRange { start: 27, end: 46 },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub sheets: SheetsConfig,
    pub ranges: Ranges,
    pub mode: CacheMode,
    pub cache_ttl: Duration,
    pub snapshot_path: PathBuf,
    pub admin_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable lookup; unset and blank values count as absent.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let text = |name: &str, default: &str| get(name).unwrap_or_else(|| default.to_string());

        let defaults = Ranges::default();
        let performance_key = match get("PERFORMANCE_KEY_RANGE") {
            Some(spec) => spec.parse::<ColumnRange>().map_err(Error::Config)?,
            None => defaults.performance_key,
        };
        let mode = match get("CACHE_MODE") {
            Some(m) => m.parse()?,
            None => CacheMode::Ttl,
        };

        Ok(Self {
            port: number(&get, "PORT", DEFAULT_PORT),
            sheets: SheetsConfig {
                spreadsheet_id: get("SPREADSHEET_ID"),
                api_key: get("GOOGLE_API_KEY"),
                access_token: get("GOOGLE_ACCESS_TOKEN"),
                base_url: text("SHEETS_BASE_URL", "https://sheets.googleapis.com"),
                timeout_secs: number(&get, "UPSTREAM_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS),
            },
            ranges: Ranges {
                profile: text("PROFILE_RANGE", &defaults.profile),
                performance_header: text("PERFORMANCE_HEADER_RANGE", &defaults.performance_header),
                performance_data: text("PERFORMANCE_DATA_RANGE", &defaults.performance_data),
                performance_key,
            },
            mode,
            cache_ttl: Duration::from_secs(number(&get, "CACHE_TTL_SECS", DEFAULT_TTL_SECS)),
            snapshot_path: PathBuf::from(text("SNAPSHOT_PATH", "data/snapshot.json")),
            admin_token: get("ADMIN_TOKEN"),
        })
    }
}

fn number<T: FromStr + Copy + std::fmt::Display>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> T {
    match get(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(var = %name, value = %raw, %default, "invalid number, using default");
            default
        }),
    }
}
