//! Camera source address normalization and key derivation.
//!
//! Every request for a source goes through [`SourceAddress::parse`]; the
//! resulting [`StreamKey`] is what the registries, the signal bus and the
//! public relay path are keyed by.
//!
//! The key is hashed from the normalized address with its `://` separator
//! intact (`rtsp://cam1/stream`). Deployments that previously hashed the
//! address with the first `//` collapsed (`rtsp:/cam1/stream`) will see
//! different relay paths for the same camera.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

/// Schemes accepted for camera sources.
const ACCEPTED_SCHEMES: &[&str] = &["rtsp", "rtsps"];

/// A validated, normalized camera source address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAddress {
    /// Address as supplied (trimmed); this is what the transcoder connects to.
    raw: String,
    /// Canonical form: lowercase scheme, no duplicate or trailing separators.
    normalized: String,
}

impl SourceAddress {
    /// Validate and normalize a source address.
    ///
    /// Requires an `rtsp://` (or `rtsps://`) scheme, a host and at least one
    /// path segment. Runs of `/` after the scheme are collapsed, so
    /// `rtsp://cam1//stream/` and `rtsp://cam1/stream` are the same source.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let trimmed = raw.trim();
        let invalid = |reason| AddressError::InvalidAddress {
            address: trimmed.to_string(),
            reason,
        };

        let (scheme, rest) = trimmed
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        let scheme = scheme.to_ascii_lowercase();
        if !ACCEPTED_SCHEMES.contains(&scheme.as_str()) {
            return Err(invalid("expected an rtsp:// address"));
        }
        if rest.starts_with('/') {
            return Err(invalid("missing host"));
        }

        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        match segments.len() {
            0 => return Err(invalid("missing host")),
            1 => return Err(invalid("missing stream path")),
            _ => {}
        }

        Ok(Self {
            raw: trimmed.to_string(),
            normalized: format!("{scheme}://{}", segments.join("/")),
        })
    }

    /// The address handed to the transcoder.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The canonical form the stream key is derived from.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Derive the stream key for this source.
    pub fn key(&self) -> StreamKey {
        StreamKey::derive(self)
    }
}

impl FromStr for SourceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

/// Deterministic identifier of a camera source.
///
/// A name-based (v3) UUID of the whole normalized address under the URL
/// namespace. Hashing the whole address rather than the path keeps two
/// cameras that expose the same path on different hosts or ports apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey(Uuid);

impl StreamKey {
    pub fn derive(source: &SourceAddress) -> Self {
        Self(Uuid::new_v3(
            &Uuid::NAMESPACE_URL,
            source.normalized().as_bytes(),
        ))
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Public path the relayed stream is served under.
    pub fn relay_path(&self) -> String {
        format!("/stream/live/{self}")
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// Address validation errors.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("Invalid RTSP address {address:?}: {reason}")]
    InvalidAddress {
        address: String,
        reason: &'static str,
    },
}
