use std::path::PathBuf;
use std::str::FromStr;

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

/// Server settings, read from `GYMTIME_*` environment variables.
/// Missing or unparsable values fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "gymtime".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parse_var(&lookup, "GYMTIME_PORT").unwrap_or(defaults.port),
            bind: lookup("GYMTIME_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("GYMTIME_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("GYMTIME_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_var(&lookup, "GYMTIME_MAX_CONNECTIONS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parse_var(&lookup, "GYMTIME_COMPACT_THRESHOLD")
                .filter(|n: &u64| *n > 0)
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parse_var(&lookup, "GYMTIME_METRICS_PORT"),
            tls_cert: lookup("GYMTIME_TLS_CERT"),
            tls_key: lookup("GYMTIME_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
