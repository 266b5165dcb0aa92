use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OtlexError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportConfig {
    pub endpoint: String,
    pub traces_endpoint: Option<String>,
    pub metrics_endpoint: Option<String>,
    pub logs_endpoint: Option<String>,
    pub headers: Vec<(String, String)>,
    pub request_timeout: Duration,
    pub max_batch_size: usize,
    pub scheduled_delay: Duration,
    pub max_queue_size: usize,
    pub export_interval: Duration,
    pub collect_timeout: Duration,
    pub debug: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:4318".to_string(),
            traces_endpoint: None,
            metrics_endpoint: None,
            logs_endpoint: None,
            headers: Vec::new(),
            request_timeout: Duration::from_secs(10),
            max_batch_size: 2048,
            scheduled_delay: Duration::from_secs(5),
            max_queue_size: 10_000,
            export_interval: Duration::from_secs(60),
            collect_timeout: Duration::from_secs(5),
            debug: false,
        }
    }
}

impl ExportConfig {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    endpoint: Option<String>,
    traces_endpoint: Option<String>,
    metrics_endpoint: Option<String>,
    logs_endpoint: Option<String>,
    headers: Option<String>,
    request_timeout: Option<String>,
    max_batch_size: Option<usize>,
    scheduled_delay: Option<String>,
    max_queue_size: Option<usize>,
    export_interval: Option<String>,
    collect_timeout: Option<String>,
    debug: Option<bool>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("OTLEX_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("otlex/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| OtlexError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| OtlexError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    let max_batch_size = parse_env_usize("OTLEX_MAX_BATCH_SIZE")?;
    let max_queue_size = parse_env_usize("OTLEX_MAX_QUEUE_SIZE")?;

    Ok(ConfigOverrides {
        endpoint: env::var("OTLEX_ENDPOINT").ok(),
        traces_endpoint: env::var("OTLEX_TRACES_ENDPOINT").ok(),
        metrics_endpoint: env::var("OTLEX_METRICS_ENDPOINT").ok(),
        logs_endpoint: env::var("OTLEX_LOGS_ENDPOINT").ok(),
        headers: env::var("OTLEX_HEADERS").ok(),
        request_timeout: env::var("OTLEX_TIMEOUT").ok(),
        max_batch_size,
        scheduled_delay: env::var("OTLEX_SCHEDULED_DELAY").ok(),
        max_queue_size,
        export_interval: env::var("OTLEX_EXPORT_INTERVAL").ok(),
        collect_timeout: env::var("OTLEX_COLLECT_TIMEOUT").ok(),
        debug: env::var("OTLEX_DEBUG").ok().map(|v| debug_enabled(&v)),
    })
}

fn parse_env_usize(name: &str) -> Result<Option<usize>> {
    match env::var(name) {
        Ok(v) => Ok(Some(v.parse::<usize>().map_err(|e| {
            OtlexError::Config(format!("bad {name} in environment: {e}"))
        })?)),
        Err(_) => Ok(None),
    }
}

fn debug_enabled(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn apply_overrides(cfg: &mut ExportConfig, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.endpoint {
        cfg.endpoint = v;
    }
    if let Some(v) = overrides.traces_endpoint {
        cfg.traces_endpoint = Some(v);
    }
    if let Some(v) = overrides.metrics_endpoint {
        cfg.metrics_endpoint = Some(v);
    }
    if let Some(v) = overrides.logs_endpoint {
        cfg.logs_endpoint = Some(v);
    }
    if let Some(v) = overrides.headers {
        cfg.headers = parse_headers(&v)
            .map_err(|e| OtlexError::Config(format!("bad headers in {source}: {e} (value={v})")))?;
    }
    if let Some(v) = overrides.request_timeout {
        cfg.request_timeout = parse_duration(&v, "request_timeout", source)?;
    }
    if let Some(v) = overrides.max_batch_size {
        if v == 0 {
            return Err(OtlexError::Config(format!(
                "max_batch_size in {source} must be positive"
            )));
        }
        cfg.max_batch_size = v;
    }
    if let Some(v) = overrides.scheduled_delay {
        cfg.scheduled_delay = parse_duration(&v, "scheduled_delay", source)?;
    }
    if let Some(v) = overrides.max_queue_size {
        cfg.max_queue_size = v;
    }
    if let Some(v) = overrides.export_interval {
        cfg.export_interval = parse_duration(&v, "export_interval", source)?;
    }
    if let Some(v) = overrides.collect_timeout {
        cfg.collect_timeout = parse_duration(&v, "collect_timeout", source)?;
    }
    if let Some(v) = overrides.debug {
        cfg.debug = v;
    }
    if cfg.max_queue_size < cfg.max_batch_size {
        return Err(OtlexError::Config(format!(
            "max_queue_size ({}) in {source} must be at least max_batch_size ({})",
            cfg.max_queue_size, cfg.max_batch_size
        )));
    }
    Ok(())
}

fn parse_duration(raw: &str, field: &str, source: &str) -> Result<Duration> {
    humantime::parse_duration(raw)
        .map_err(|e| OtlexError::Config(format!("bad {field} in {source}: {e} (value={raw})")))
}

fn parse_headers(raw: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for entry in raw.split(',') {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(OtlexError::Config(
                "header entries must use key=value syntax".to_string(),
            ));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(OtlexError::Config("header key cannot be empty".to_string()));
        }
        out.push((key.to_string(), value.trim().to_string()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_expected_limits() {
        let cfg = ExportConfig::default();
        assert_eq!(cfg.endpoint, "http://127.0.0.1:4318");
        assert_eq!(cfg.max_batch_size, 2048);
        assert_eq!(cfg.max_queue_size, 10_000);
        assert_eq!(cfg.scheduled_delay, Duration::from_secs(5));
        assert_eq!(cfg.export_interval, Duration::from_secs(60));
        assert!(!cfg.debug);
    }

    #[test]
    fn parse_headers_accepts_list() {
        let headers = parse_headers("x-tenant=dev,authorization=Bearer token").unwrap();
        assert_eq!(
            headers,
            vec![
                ("x-tenant".to_string(), "dev".to_string()),
                ("authorization".to_string(), "Bearer token".to_string())
            ]
        );
    }

    #[test]
    fn parse_headers_rejects_bad_entries() {
        assert!(parse_headers("x-tenant").is_err());
        assert!(parse_headers("=dev").is_err());
    }

    #[test]
    fn debug_toggle_accepts_common_spellings() {
        assert!(debug_enabled("1"));
        assert!(debug_enabled("TRUE"));
        assert!(debug_enabled("on"));
        assert!(!debug_enabled("0"));
        assert!(!debug_enabled("off"));
    }

    #[test]
    fn apply_file_overrides_updates_fields() {
        let mut cfg = ExportConfig::default();
        let file = ConfigOverrides {
            endpoint: Some("http://collector:4318".to_string()),
            traces_endpoint: Some("http://traces:4318".to_string()),
            headers: Some("x-tenant=dev,authorization=Bearer token".to_string()),
            request_timeout: Some("3s".to_string()),
            max_batch_size: Some(512),
            scheduled_delay: Some("250ms".to_string()),
            export_interval: Some("30s".to_string()),
            debug: Some(true),
            ..ConfigOverrides::default()
        };

        apply_overrides(&mut cfg, file, "config file").unwrap();

        assert_eq!(cfg.endpoint, "http://collector:4318");
        assert_eq!(cfg.traces_endpoint.as_deref(), Some("http://traces:4318"));
        assert_eq!(cfg.request_timeout, Duration::from_secs(3));
        assert_eq!(cfg.max_batch_size, 512);
        assert_eq!(cfg.scheduled_delay, Duration::from_millis(250));
        assert_eq!(cfg.export_interval, Duration::from_secs(30));
        assert!(cfg.debug);
    }

    #[test]
    fn rejects_queue_smaller_than_batch() {
        let mut cfg = ExportConfig::default();
        let file = ConfigOverrides {
            max_queue_size: Some(4),
            ..ConfigOverrides::default()
        };
        assert!(apply_overrides(&mut cfg, file, "config file").is_err());

        let mut cfg = ExportConfig::default();
        let file = ConfigOverrides {
            max_batch_size: Some(512),
            max_queue_size: Some(512),
            ..ConfigOverrides::default()
        };
        apply_overrides(&mut cfg, file, "config file").unwrap();
        assert_eq!(cfg.max_queue_size, 512);
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut cfg = ExportConfig::default();
        let file = ConfigOverrides {
            max_batch_size: Some(0),
            ..ConfigOverrides::default()
        };
        assert!(apply_overrides(&mut cfg, file, "config file").is_err());
    }
}
