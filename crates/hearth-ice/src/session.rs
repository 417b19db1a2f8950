//! Offer/answer session descriptions
//!
//! Descriptions travel between endpoints as opaque text blobs. Only this
//! crate looks inside them; the diagnostics layer forwards them verbatim,
//! exactly as a production signaling channel would.

use hearth_core::{HearthError, Result};
use serde::{Deserialize, Serialize};

/// Whether a description opens or answers a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptionKind {
    /// Initiating side
    Offer,
    /// Responding side
    Answer,
}

/// An opaque session description blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    pub kind: DescriptionKind,
    blob: String,
}

impl SessionDescription {
    /// Build an offer carrying local credentials and the channel label
    pub fn offer(ufrag: &str, pwd: &str, channel_label: &str) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            blob: format!("v=hearth0\nk=offer\nu={ufrag}\np={pwd}\nc={channel_label}\n"),
        }
    }

    /// Build an answer carrying local credentials, echoing the channel label
    pub fn answer(ufrag: &str, pwd: &str, channel_label: &str) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            blob: format!("v=hearth0\nk=answer\nu={ufrag}\np={pwd}\nc={channel_label}\n"),
        }
    }

    /// The raw blob, for forwarding
    pub fn blob(&self) -> &str {
        &self.blob
    }

    /// Reconstruct from a forwarded blob
    pub fn from_blob(blob: &str) -> Result<Self> {
        let kind = match field(blob, 'k') {
            Some("offer") => DescriptionKind::Offer,
            Some("answer") => DescriptionKind::Answer,
            _ => return Err(HearthError::protocol("description missing k= line")),
        };
        if field(blob, 'u').is_none() || field(blob, 'p').is_none() {
            return Err(HearthError::protocol("description missing credentials"));
        }
        Ok(Self {
            kind,
            blob: blob.to_string(),
        })
    }

    /// Username fragment of the issuing endpoint
    pub fn ufrag(&self) -> &str {
        field(&self.blob, 'u').unwrap_or_default()
    }

    /// Password of the issuing endpoint
    pub fn pwd(&self) -> &str {
        field(&self.blob, 'p').unwrap_or_default()
    }

    /// Channel label carried by the description
    pub fn channel_label(&self) -> Option<&str> {
        field(&self.blob, 'c')
    }
}

fn field(blob: &str, key: char) -> Option<&str> {
    blob.lines().find_map(|line| {
        let mut chars = line.chars();
        (chars.next() == Some(key) && chars.next() == Some('=')).then(|| &line[2..])
    })
}

/// Generate a random ICE username fragment
pub(crate) fn generate_ufrag() -> String {
    random_token(8)
}

/// Generate a random ICE password
pub(crate) fn generate_pwd() -> String {
    random_token(22)
}

fn random_token(len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    (0..len)
        .map(|_| ALPHABET[fastrand::usize(..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_blob_roundtrip() {
        let offer = SessionDescription::offer("frag1234", "pw", "diagnostics");
        let parsed = SessionDescription::from_blob(offer.blob()).unwrap();
        assert_eq!(parsed.kind, DescriptionKind::Offer);
        assert_eq!(parsed.ufrag(), "frag1234");
        assert_eq!(parsed.pwd(), "pw");
        assert_eq!(parsed.channel_label(), Some("diagnostics"));
    }

    #[test]
    fn test_answer_kind() {
        let answer = SessionDescription::answer("x", "y", "diagnostics");
        assert_eq!(answer.kind, DescriptionKind::Answer);
    }

    #[test]
    fn test_from_blob_rejects_incomplete() {
        assert!(SessionDescription::from_blob("v=hearth0\n").is_err());
        assert!(SessionDescription::from_blob("v=hearth0\nk=offer\n").is_err());
    }

    #[test]
    fn test_generated_credentials_shape() {
        let ufrag = generate_ufrag();
        let pwd = generate_pwd();
        assert_eq!(ufrag.len(), 8);
        assert_eq!(pwd.len(), 22);
        assert!(ufrag.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
