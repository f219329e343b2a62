use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Process-level settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace opened before the first request, if any.
    pub workspace: Option<PathBuf>,
    /// When false, mutations skip the history write entirely.
    pub audit_enabled: bool,
    pub busy_timeout: Duration,
    pub log_filter: String,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            audit_enabled: true,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            log_filter: "schoold=info".to_string(),
            log_json: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let busy_timeout = lookup("SCHOOLD_BUSY_TIMEOUT_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.busy_timeout);
        Self {
            workspace: lookup("SCHOOLD_WORKSPACE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            audit_enabled: parse_bool(lookup("SCHOOLD_AUDIT"), defaults.audit_enabled),
            busy_timeout,
            log_filter: lookup("SCHOOLD_LOG")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.log_filter),
            log_json: parse_bool(lookup("SCHOOLD_LOG_JSON"), defaults.log_json),
        }
    }
}

fn parse_bool(raw: Option<String>, default: bool) -> bool {
    raw.and_then(|v| match v.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    })
    .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = config_from(&[]);
        assert!(cfg.workspace.is_none());
        assert!(cfg.audit_enabled);
        assert_eq!(cfg.busy_timeout, Duration::from_millis(5000));
        assert_eq!(cfg.log_filter, "schoold=info");
        assert!(!cfg.log_json);
    }

    #[test]
    fn env_values_override_defaults() {
        let cfg = config_from(&[
            ("SCHOOLD_WORKSPACE", "/tmp/ws"),
            ("SCHOOLD_AUDIT", "no"),
            ("SCHOOLD_BUSY_TIMEOUT_MS", "250"),
            ("SCHOOLD_LOG", "schoold=debug"),
            ("SCHOOLD_LOG_JSON", "1"),
        ]);
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
        assert!(!cfg.audit_enabled);
        assert_eq!(cfg.busy_timeout, Duration::from_millis(250));
        assert_eq!(cfg.log_filter, "schoold=debug");
        assert!(cfg.log_json);
    }

    #[test]
    fn garbage_booleans_fall_back_to_default() {
        let cfg = config_from(&[("SCHOOLD_AUDIT", "maybe"), ("SCHOOLD_BUSY_TIMEOUT_MS", "x")]);
        assert!(cfg.audit_enabled);
        assert_eq!(cfg.busy_timeout, Duration::from_millis(5000));
    }
}
