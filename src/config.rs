use std::path::PathBuf;
use std::str::FromStr;

use crate::error::SchedulingError;
use crate::lifecycle::TransitionPolicy;
use crate::time::ShopZone;

/// Process settings, read from `TURNERO_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub zone: ShopZone,
    pub policy: TransitionPolicy,
    /// Shop schedule to install at startup, if the log has none.
    pub shop_config: Option<PathBuf>,
    /// Customer/vehicle directory file. Without one, references are trusted.
    pub directory: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7878,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            max_connections: 256,
            compact_threshold: 1000,
            zone: ShopZone::default(),
            policy: TransitionPolicy::Strict,
            shop_config: None,
            directory: None,
        }
    }
}

impl Settings {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, SchedulingError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable values fall back to their defaults; an unknown time zone
    /// is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SchedulingError> {
        let defaults = Self::default();

        let zone = match lookup("TURNERO_TIMEZONE") {
            Some(name) => name.trim().parse()?,
            None => defaults.zone,
        };
        let allow_cancel_confirmed = lookup("TURNERO_ALLOW_CANCEL_CONFIRMED")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        Ok(Self {
            bind: lookup("TURNERO_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "TURNERO_PORT").unwrap_or(defaults.port),
            data_dir: lookup("TURNERO_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: parsed(&lookup, "TURNERO_METRICS_PORT"),
            max_connections: parsed(&lookup, "TURNERO_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "TURNERO_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            zone,
            policy: TransitionPolicy::from_flag(allow_cancel_confirmed),
            shop_config: lookup("TURNERO_SHOP_CONFIG").map(PathBuf::from),
            directory: lookup("TURNERO_DIRECTORY").map(PathBuf::from),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("appointments.wal")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.data_dir.join("audit.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}
