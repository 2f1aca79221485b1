//! Capability profiles.

use serde::{Deserialize, Serialize};

/// The optional algorithms and curves enabled for a driver.
///
/// Enclaves differ in which optional features their firmware
/// ships with. The profile is fixed when the driver is created
/// and consulted by every translation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// HMAC over SHA-1, SHA-224, SHA-384 and SHA-512. HMAC-SHA-256
    /// is always available.
    pub extended_hmac: bool,
    /// Brainpool R1 curves.
    pub brainpool: bool,
    /// Multi-part MAC operations.
    pub mac_multipart: bool,
    /// SHA-3 digests.
    pub sha3: bool,
}

impl Capabilities {
    /// The features every enclave supports.
    pub const fn base() -> Self {
        Self {
            extended_hmac: false,
            brainpool: false,
            mac_multipart: true,
            sha3: false,
        }
    }

    /// The features of enclaves with the extended firmware.
    pub const fn extended() -> Self {
        Self {
            extended_hmac: true,
            brainpool: true,
            mac_multipart: true,
            sha3: false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        if cfg!(feature = "extended") {
            Self::extended()
        } else {
            Self::base()
        }
    }
}

/// Configures a [`Driver`][crate::Driver].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// The enabled capabilities.
    pub capabilities: Capabilities,
}
