//! Server configuration: an optional TOML config file merged with a
//! hand-rolled `--flag value` argument loop (no `clap`, matching the rest
//! of this workspace's binaries) covering exactly the server CLI surface.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub address: String,
    pub address6: Option<String>,
    pub log_file: Option<String>,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            address: "0.0.0.0".to_string(),
            address6: None,
            log_file: None,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// `ERROR:`-prefixed entries are fatal; anything else is a warning the
    /// server still starts with.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();
        if self.port == 0 {
            issues.push("ERROR: --port must be nonzero".to_string());
        }
        if self.address.is_empty() {
            issues.push("ERROR: --address must not be empty".to_string());
        }
        let has_errors = issues.iter().any(|i| i.starts_with("ERROR:"));
        if has_errors {
            Err(issues)
        } else {
            for issue in &issues {
                tracing::warn!("{issue}");
            }
            Ok(())
        }
    }
}

/// Parses `--config <path>` first (if present, its TOML contents become
/// the base config), then applies every other `--flag value` pair on top.
pub fn parse_args(args: &[String]) -> ServerConfig {
    let mut config_path: Option<PathBuf> = None;
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--config" {
            if let Some(v) = args.get(i + 1) {
                config_path = Some(PathBuf::from(v));
                i += 1;
            }
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse config file, using defaults");
                ServerConfig::default()
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "config file unreadable, using defaults");
                ServerConfig::default()
            }
        },
        None => ServerConfig::default(),
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                if let Some(v) = args.get(i + 1).and_then(|v| v.parse().ok()) {
                    config.port = v;
                    i += 1;
                }
            }
            "--address" => {
                if let Some(v) = args.get(i + 1) {
                    config.address = v.clone();
                    i += 1;
                }
            }
            "--address6" => {
                if let Some(v) = args.get(i + 1) {
                    config.address6 = Some(v.clone());
                    i += 1;
                }
            }
            "--log-file" => {
                if let Some(v) = args.get(i + 1) {
                    config.log_file = Some(v.clone());
                    i += 1;
                }
            }
            "--log-level" => {
                if let Some(v) = args.get(i + 1) {
                    config.log_level = v.clone();
                    i += 1;
                }
            }
            "--config" => i += 1, // already consumed above
            other if other.starts_with("--") => tracing::warn!("ignoring unrecognized argument: {other}"),
            _ => {}
        }
        i += 1;
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_validate_cleanly() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn parses_flags() {
        let config = parse_args(&args(&["--port", "7000", "--address", "127.0.0.1", "--log-level", "debug"]));
        assert_eq!(config.port, 7000);
        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut config = ServerConfig::default();
        config.port = 0;
        assert!(config.validate().is_err());
    }
}
