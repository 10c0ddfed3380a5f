//! Version-gated server capabilities.
//!
//! Every behavior that depends on the server version is listed once in
//! [`GATES`] and evaluated together into a [`CapabilitySet`]. An unknown
//! version unlocks nothing.

use crate::version::Version;

/// A server feature that only exists from a given version on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Configuration moves from CLI flags to `initializationOptions`.
    InitializationOptions,
    /// `--include` / `--exclude` module filters on the command line.
    ModuleFilters,
    /// `sphinx.forceFullBuild` and `sphinx.numJobs` options.
    BuildTuning,
}

impl Capability {
    const fn bit(self) -> u8 {
        match self {
            Capability::InitializationOptions => 1,
            Capability::ModuleFilters => 1 << 1,
            Capability::BuildTuning => 1 << 2,
        }
    }
}

/// Minimum server version for each capability, in ascending order.
pub const GATES: &[(Version, Capability)] = &[
    (Version::new(0, 6, 2), Capability::InitializationOptions),
    (Version::new(0, 9, 0), Capability::ModuleFilters),
    (Version::new(0, 11, 0), Capability::BuildTuning),
];

/// Capabilities supported by one server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    /// Evaluate every gate against `version`.
    pub fn for_version(version: Option<&Version>) -> Self {
        let Some(version) = version else {
            return Self::default();
        };

        let bits = GATES
            .iter()
            .filter(|(threshold, _)| version >= threshold)
            .fold(0, |acc, (_, capability)| acc | capability.bit());
        Self(bits)
    }

    /// Evaluate every gate against a raw version string from the probe.
    pub fn for_reported(raw: &str) -> Self {
        Self::for_version(Version::from_probe_output(raw).as_ref())
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}
