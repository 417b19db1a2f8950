//! ICE candidate model and textual encoding
//!
//! Candidates cross component boundaries as text in the standard
//! `candidate:` line format and are forwarded verbatim by everything outside
//! this crate.

use hearth_core::{HearthError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// How a candidate address was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateKind {
    /// Local interface address
    Host,
    /// Public-facing address discovered via STUN
    ServerReflexive,
    /// TURN-relayed address
    Relay,
}

impl CandidateKind {
    /// The `typ` token used in the textual encoding
    pub fn token(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::ServerReflexive => "srflx",
            Self::Relay => "relay",
        }
    }

    fn from_token(token: &str) -> Result<Self> {
        match token {
            "host" => Ok(Self::Host),
            "srflx" => Ok(Self::ServerReflexive),
            "relay" => Ok(Self::Relay),
            other => Err(HearthError::protocol(format!(
                "unknown candidate type: {other}"
            ))),
        }
    }

    /// RFC 8445 type preference used in priority computation
    fn type_preference(&self) -> u32 {
        match self {
            Self::Host => 126,
            Self::ServerReflexive => 100,
            Self::Relay => 0,
        }
    }
}

/// One candidate transport address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Grouping identifier for candidates from the same source
    pub foundation: String,
    /// RFC 8445 priority (higher is preferred)
    pub priority: u32,
    /// The transport address peers should try
    pub address: SocketAddr,
    /// Discovery mechanism
    pub kind: CandidateKind,
}

impl Candidate {
    /// Create a candidate with the standard priority for its kind
    pub fn new(foundation: impl Into<String>, address: SocketAddr, kind: CandidateKind) -> Self {
        Self {
            foundation: foundation.into(),
            priority: priority_for(kind),
            address,
            kind,
        }
    }

    /// Encode as a standard `candidate:` line
    pub fn encode(&self) -> String {
        format!(
            "candidate:{} 1 udp {} {} {} typ {}",
            self.foundation,
            self.priority,
            self.address.ip(),
            self.address.port(),
            self.kind.token()
        )
    }

    /// Parse a `candidate:` line produced by [`Candidate::encode`]
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let rest = line
            .strip_prefix("candidate:")
            .ok_or_else(|| HearthError::protocol("missing candidate: prefix"))?;

        let parts: Vec<&str> = rest.split_whitespace().collect();
        if parts.len() < 8 || parts[6] != "typ" {
            return Err(HearthError::protocol(format!(
                "malformed candidate line: {line}"
            )));
        }

        let priority: u32 = parts[3]
            .parse()
            .map_err(|_| HearthError::protocol("invalid candidate priority"))?;
        let ip: std::net::IpAddr = parts[4]
            .parse()
            .map_err(|_| HearthError::protocol("invalid candidate address"))?;
        let port: u16 = parts[5]
            .parse()
            .map_err(|_| HearthError::protocol("invalid candidate port"))?;
        let kind = CandidateKind::from_token(parts[7])?;

        Ok(Self {
            foundation: parts[0].to_string(),
            priority,
            address: SocketAddr::new(ip, port),
            kind,
        })
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Priority per RFC 8445 §5.1.2.1 with local preference 65535, component 1
fn priority_for(kind: CandidateKind) -> u32 {
    (kind.type_preference() << 24) | (65535 << 8) | (256 - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        let host = Candidate::new("h0", "10.0.0.1:4000".parse().unwrap(), CandidateKind::Host);
        let srflx = Candidate::new(
            "s0",
            "203.0.113.7:4000".parse().unwrap(),
            CandidateKind::ServerReflexive,
        );
        let relay = Candidate::new(
            "r0",
            "198.51.100.1:4000".parse().unwrap(),
            CandidateKind::Relay,
        );
        assert!(host.priority > srflx.priority);
        assert!(srflx.priority > relay.priority);
    }

    #[test]
    fn test_encode_parse_roundtrip() {
        let cand = Candidate::new(
            "s1",
            "203.0.113.7:61234".parse().unwrap(),
            CandidateKind::ServerReflexive,
        );
        let line = cand.encode();
        assert!(line.starts_with("candidate:s1 1 udp "));
        assert!(line.ends_with("typ srflx"));

        let parsed = Candidate::parse(&line).unwrap();
        assert_eq!(parsed, cand);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Candidate::parse("not a candidate").is_err());
        assert!(Candidate::parse("candidate:x 1 udp nope").is_err());
        assert!(Candidate::parse("candidate:x 1 udp 1 10.0.0.1 99 typ warp").is_err());
    }

    #[test]
    fn test_parse_ipv6() {
        let cand = Candidate::new("h0", "[::1]:9000".parse().unwrap(), CandidateKind::Host);
        let parsed = Candidate::parse(&cand.encode()).unwrap();
        assert_eq!(parsed.address, cand.address);
    }
}
