//! Candidate server configuration
//!
//! Compiled-in defaults that an embedding application overrides through
//! constructor arguments. There is no file-based configuration.

use serde::{Deserialize, Serialize};

/// A TURN relay descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServer {
    /// Relay address as `host:port`
    pub address: String,
    /// Long-term credential username
    pub username: String,
    /// Long-term credential password
    pub credential: String,
}

/// Candidate server list for gathering and probing
///
/// The STUN list is ordered: basic reachability probes use the first entry,
/// the negotiation endpoints use the full list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceConfig {
    /// STUN server addresses as `host:port`, in preference order
    pub stun_servers: Vec<String>,
    /// TURN relay descriptors
    pub turn_servers: Vec<TurnServer>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                "stun.l.google.com:19302".to_string(),
                "stun1.l.google.com:19302".to_string(),
                "stun.cloudflare.com:3478".to_string(),
            ],
            turn_servers: Vec::new(),
        }
    }
}

impl IceConfig {
    /// Configuration with no candidate servers at all
    ///
    /// Endpoints still gather host candidates, which is enough for two
    /// endpoints on the same machine to connect over loopback.
    pub fn local_only() -> Self {
        Self {
            stun_servers: Vec::new(),
            turn_servers: Vec::new(),
        }
    }

    /// Configuration with a single STUN server and nothing else
    pub fn single_stun(server: impl Into<String>) -> Self {
        Self {
            stun_servers: vec![server.into()],
            turn_servers: Vec::new(),
        }
    }

    /// All server addresses an endpoint should query while gathering
    ///
    /// TURN relays also answer binding requests, so they contribute
    /// server-reflexive mappings here; relay allocation is not attempted.
    pub fn gathering_servers(&self) -> Vec<String> {
        let mut servers = self.stun_servers.clone();
        servers.extend(self.turn_servers.iter().map(|t| t.address.clone()));
        servers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_servers() {
        let config = IceConfig::default();
        assert!(!config.stun_servers.is_empty());
        assert!(config.turn_servers.is_empty());
    }

    #[test]
    fn test_gathering_servers_includes_turn() {
        let config = IceConfig {
            stun_servers: vec!["stun.example.com:3478".to_string()],
            turn_servers: vec![TurnServer {
                address: "turn.example.com:3478".to_string(),
                username: "user".to_string(),
                credential: "pass".to_string(),
            }],
        };
        let servers = config.gathering_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1], "turn.example.com:3478");
    }
}
