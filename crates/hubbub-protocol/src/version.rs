//! Version negotiation for the `connect` handshake.
//!
//! A client names only the major version it was built against. The relay
//! answers `connected` carrying its own major version when the two match, and
//! an `error` with code 1001 otherwise. Minor revisions only add optional frame
//! fields, which older peers ignore on decode, so they never take part in
//! negotiation.

use std::fmt;
use thiserror::Error;

/// The protocol revision this build speaks.
pub const PROTOCOL_VERSION: Version = Version::new(1, 0);

/// A protocol revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    /// Incremented when a frame changes incompatibly.
    pub major: u8,
    /// Incremented when optional fields are added.
    pub minor: u8,
}

/// A `connect` frame named a major version the relay cannot speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Unsupported protocol version {requested} (relay speaks {supported})")]
pub struct UnsupportedVersion {
    /// Major version the client asked for.
    pub requested: u8,
    /// What the relay speaks.
    pub supported: Version,
}

impl Version {
    /// Create a version.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Settle the version for a client announcing `client_major`.
    ///
    /// Returns the major version to report in `connected`.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedVersion`] when the majors differ.
    pub fn negotiate(self, client_major: u8) -> Result<u8, UnsupportedVersion> {
        if client_major == self.major {
            Ok(self.major)
        } else {
            Err(UnsupportedVersion {
                requested: client_major,
                supported: self,
            })
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
