//! Sidecar configuration parsed from environment variables.

use std::path::PathBuf;

pub const DEFAULT_LATE_GRACE_MINUTES: i64 = 10;
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Workspace opened at startup, before any `workspace.select`.
    pub workspace: Option<PathBuf>,
    /// Lab station name recorded on login logs and feedback.
    pub pc_number: Option<String>,
    pub late_grace_minutes: i64,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            pc_number: None,
            late_grace_minutes: DEFAULT_LATE_GRACE_MINUTES,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    /// Optional:
    /// - `LABDESK_WORKSPACE`
    /// - `LABDESK_PC_NUMBER`: falls back to `COMPUTERNAME` / `HOSTNAME`
    /// - `LABDESK_LATE_GRACE_MINUTES`: default 10
    /// - `LABDESK_LOG`: tracing filter, default `info`
    ///
    /// Returns the config plus warnings for values that were ignored.
    pub fn from_env() -> (Self, Vec<String>) {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> (Self, Vec<String>) {
        let mut warnings = Vec::new();
        let non_empty = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let late_grace_minutes = match non_empty("LABDESK_LATE_GRACE_MINUTES") {
            None => DEFAULT_LATE_GRACE_MINUTES,
            Some(raw) => match raw.parse::<i64>() {
                Ok(v) if (0..=240).contains(&v) => v,
                _ => {
                    warnings.push(format!(
                        "LABDESK_LATE_GRACE_MINUTES={raw} is not 0..=240, using {DEFAULT_LATE_GRACE_MINUTES}"
                    ));
                    DEFAULT_LATE_GRACE_MINUTES
                }
            },
        };

        let config = Self {
            workspace: non_empty("LABDESK_WORKSPACE").map(PathBuf::from),
            pc_number: non_empty("LABDESK_PC_NUMBER")
                .or_else(|| non_empty("COMPUTERNAME"))
                .or_else(|| non_empty("HOSTNAME")),
            late_grace_minutes,
            log_filter: non_empty("LABDESK_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        };
        (config, warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let (cfg, warnings) = Config::from_lookup(lookup(&[]));
        assert_eq!(cfg, Config::default());
        assert!(warnings.is_empty());
    }

    #[test]
    fn reads_overrides_and_hostname_fallback() {
        let (cfg, _) = Config::from_lookup(lookup(&[
            ("LABDESK_WORKSPACE", "/tmp/lab"),
            ("HOSTNAME", "LAB-PC-07"),
            ("LABDESK_LATE_GRACE_MINUTES", "15"),
            ("LABDESK_LOG", "labdeskd=debug"),
        ]));
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/lab")));
        assert_eq!(cfg.pc_number.as_deref(), Some("LAB-PC-07"));
        assert_eq!(cfg.late_grace_minutes, 15);
        assert_eq!(cfg.log_filter, "labdeskd=debug");
    }

    #[test]
    fn bad_grace_falls_back_with_warning() {
        let (cfg, warnings) = Config::from_lookup(lookup(&[("LABDESK_LATE_GRACE_MINUTES", "soon")]));
        assert_eq!(cfg.late_grace_minutes, DEFAULT_LATE_GRACE_MINUTES);
        assert_eq!(warnings.len(), 1);
    }
}
