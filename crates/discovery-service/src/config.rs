//! Discovery-service configuration: a hand-rolled `--flag value` argument
//! loop (no `clap`, matching the rest of this workspace's binaries) plus
//! validation before the service binds anything.

#[derive(Debug, Clone)]
pub struct DiscoveryServiceConfig {
    /// Raw-TCP ACIP listener port (also the one raw-TCP test scenarios use).
    pub port: u16,
    /// The browser-facing HTTP/WebSocket listener binds `port + 1`.
    pub websocket_port: u16,
    pub discovery_database_path: Option<String>,
    pub encrypt_key: Option<String>,
    pub require_server_identity: bool,
    pub require_client_identity: bool,
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<String>,
    pub turn_username: Option<String>,
    pub turn_credential: Option<String>,
    pub turn_secret: Option<String>,
    pub upnp: bool,
}

impl Default for DiscoveryServiceConfig {
    fn default() -> Self {
        Self {
            port: 27224,
            websocket_port: 27225,
            discovery_database_path: None,
            encrypt_key: None,
            require_server_identity: false,
            require_client_identity: false,
            stun_servers: Vec::new(),
            turn_servers: Vec::new(),
            turn_username: None,
            turn_credential: None,
            turn_secret: None,
            upnp: false,
        }
    }
}

impl DiscoveryServiceConfig {
    /// `ERROR:`-prefixed entries are fatal; anything else is a warning the
    /// service still starts with.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();
        if self.port == 0 {
            issues.push("ERROR: --port must be nonzero".to_string());
        }
        if self.websocket_port == self.port {
            issues.push("ERROR: the websocket listener cannot share --port with the raw-TCP listener".to_string());
        }
        if self.require_client_identity && !self.require_server_identity {
            issues.push(
                "WARNING: --require-client-identity without --require-server-identity still lets unsigned session creators in".to_string(),
            );
        }
        if (self.turn_username.is_some() || self.turn_credential.is_some()) && self.turn_servers.is_empty() {
            issues.push("WARNING: TURN credentials set without --turn-servers have no effect".to_string());
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

/// Parses `--flag value` pairs and `--flag` boolean switches from `args`
/// (excluding argv[0]).
pub fn parse_args(args: &[String]) -> DiscoveryServiceConfig {
    let mut config = DiscoveryServiceConfig::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                if let Some(v) = args.get(i + 1).and_then(|v| v.parse().ok()) {
                    config.port = v;
                    i += 1;
                }
            }
            "--discovery-database-path" => {
                if let Some(v) = args.get(i + 1) {
                    config.discovery_database_path = Some(v.clone());
                    i += 1;
                }
            }
            "--encrypt-key" => {
                if let Some(v) = args.get(i + 1) {
                    config.encrypt_key = Some(v.clone());
                    i += 1;
                }
            }
            "--require-server-identity" => config.require_server_identity = true,
            "--require-client-identity" => config.require_client_identity = true,
            "--stun-servers" => {
                if let Some(v) = args.get(i + 1) {
                    config.stun_servers = v.split(',').map(str::to_string).collect();
                    i += 1;
                }
            }
            "--turn-servers" => {
                if let Some(v) = args.get(i + 1) {
                    config.turn_servers = v.split(',').map(str::to_string).collect();
                    i += 1;
                }
            }
            "--turn-username" => {
                if let Some(v) = args.get(i + 1) {
                    config.turn_username = Some(v.clone());
                    i += 1;
                }
            }
            "--turn-credential" => {
                if let Some(v) = args.get(i + 1) {
                    config.turn_credential = Some(v.clone());
                    i += 1;
                }
            }
            "--turn-secret" => {
                if let Some(v) = args.get(i + 1) {
                    config.turn_secret = Some(v.clone());
                    i += 1;
                }
            }
            "--upnp" => config.upnp = true,
            other => tracing::warn!("ignoring unrecognized argument: {other}"),
        }
        i += 1;
    }
    config.websocket_port = config.port.wrapping_add(1);
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
        assert!(DiscoveryServiceConfig::default().validate().is_ok());
    }

    #[test]
    fn parses_port_and_flags() {
        let config = parse_args(&args(&["--port", "9000", "--require-server-identity", "--upnp"]));
        assert_eq!(config.port, 9000);
        assert_eq!(config.websocket_port, 9001);
        assert!(config.require_server_identity);
        assert!(config.upnp);
    }

    #[test]
    fn parses_comma_separated_server_lists() {
        let config = parse_args(&args(&["--stun-servers", "stun:a.example,stun:b.example"]));
        assert_eq!(config.stun_servers, vec!["stun:a.example", "stun:b.example"]);
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut config = DiscoveryServiceConfig::default();
        config.port = 0;
        assert!(config.validate().is_err());
    }
}
