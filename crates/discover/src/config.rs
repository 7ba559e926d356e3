//! Discovery client configuration: hand-rolled `--flag value` parsing, same
//! style as the server and client binaries.

#[derive(Debug, Clone)]
pub struct DiscoverConfig {
    pub session_string: Option<String>,
    pub discovery_server: String,
    pub discovery_port: u16,
    pub port: u16,
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            session_string: None,
            discovery_server: "127.0.0.1".to_string(),
            discovery_port: 27224,
            port: 9090,
        }
    }
}

impl DiscoverConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();
        if self.discovery_server.is_empty() {
            issues.push("ERROR: --discovery-server must not be empty".to_string());
        }
        if self.discovery_port == 0 {
            issues.push("ERROR: --discovery-port must be nonzero".to_string());
        }
        if self.port == 0 {
            issues.push("ERROR: --port must be nonzero".to_string());
        }
        if issues.iter().any(|i| i.starts_with("ERROR:")) {
            Err(issues)
        } else {
            Ok(())
        }
    }
}

pub fn parse_args(args: &[String]) -> DiscoverConfig {
    let mut config = DiscoverConfig::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--session-string" => {
                if let Some(v) = args.get(i + 1) {
                    config.session_string = Some(v.clone());
                    i += 1;
                }
            }
            "--discovery-server" => {
                if let Some(v) = args.get(i + 1) {
                    config.discovery_server = v.clone();
                    i += 1;
                }
            }
            "--discovery-port" => {
                if let Some(v) = args.get(i + 1).and_then(|v| v.parse().ok()) {
                    config.discovery_port = v;
                    i += 1;
                }
            }
            "--port" => {
                if let Some(v) = args.get(i + 1).and_then(|v| v.parse().ok()) {
                    config.port = v;
                    i += 1;
                }
            }
            other => tracing::warn!("ignoring unrecognized argument: {other}"),
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
        assert!(DiscoverConfig::default().validate().is_ok());
    }

    #[test]
    fn parses_flags() {
        let config = parse_args(&args(&[
            "--session-string",
            "correct-horse-battery-staple",
            "--discovery-server",
            "discover.example.org",
            "--discovery-port",
            "4000",
            "--port",
            "9191",
        ]));
        assert_eq!(config.session_string.as_deref(), Some("correct-horse-battery-staple"));
        assert_eq!(config.discovery_server, "discover.example.org");
        assert_eq!(config.discovery_port, 4000);
        assert_eq!(config.port, 9191);
    }

    #[test]
    fn no_session_string_means_create_mode() {
        assert!(DiscoverConfig::default().session_string.is_none());
    }

    #[test]
    fn zero_discovery_port_is_rejected() {
        let mut config = DiscoverConfig::default();
        config.discovery_port = 0;
        assert!(config.validate().is_err());
    }
}
