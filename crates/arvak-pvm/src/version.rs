//! Server version gating.
//!
//! Persistent QVMs and asynchronous jobs were added to QVM-NG in 1.11.0.
//! Every session or job checks the server version before asking for a token.

use std::fmt;
use std::str::FromStr;

use crate::error::{PvmError, PvmResult};

/// Oldest minor release of the 1.x line that supports persistent QVMs.
pub const MIN_SUPPORTED_MINOR: u64 = 11;

/// A parsed `major.minor.patch` server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// Whether this server version supports persistent QVMs.
    ///
    /// Only the 1.x line is gated; other majors are accepted and left to the
    /// server to reject.
    pub fn is_supported(&self) -> bool {
        !(self.major == 1 && self.minor < MIN_SUPPORTED_MINOR)
    }
}

impl FromStr for Version {
    type Err = PvmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        let [major, minor, patch] = parts[..] else {
            return Err(PvmError::VersionParse(s.to_string()));
        };

        let parse = |part: &str| {
            // u64::from_str accepts a leading '+', the server never sends one.
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(PvmError::VersionParse(s.to_string()));
            }
            part.parse::<u64>()
                .map_err(|_| PvmError::VersionParse(s.to_string()))
        };

        Ok(Version {
            major: parse(major)?,
            minor: parse(minor)?,
            patch: parse(patch)?,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Parse `version` and reject servers too old for persistent QVMs.
pub fn check_version(version: &str) -> PvmResult<Version> {
    let parsed: Version = version.parse()?;
    if !parsed.is_supported() {
        return Err(PvmError::VersionMismatch {
            found: version.to_string(),
        });
    }
    Ok(parsed)
}
