//! Versions reported by the language server.
//!
//! The server is a Python package, so besides plain `1.2.3` this accepts the
//! PEP 440 pre-release spellings it actually ships with:
//! - `0.16.4`, `v0.16.4`
//! - `1.0.0b1`, `1.0.0-beta.1`
//! - `1.0.0a2`, `1.0.0rc1`, `1.0.0.dev3`
//!
//! Anything else is rejected. Callers treat a rejected version as unknown.

use std::cmp::Ordering;
use std::fmt;

/// Release version with optional pre-release tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub pre_release: Option<PreRelease>,
}

/// Pre-release version type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreRelease {
    Dev(u32),
    Alpha(u32),
    Beta(u32),
    Rc(u32),
}

impl Version {
    /// Create a new version.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: None,
        }
    }

    /// Parse a single version token.
    ///
    /// All three release components are required; `0.9` is rejected.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        // Local version labels never affect gating.
        let s = s.split_once('+').map_or(s, |(v, _)| v);

        let (major, rest) = split_number(s)?;
        let (minor, rest) = split_number(rest.strip_prefix('.')?)?;
        let (patch, rest) = split_number(rest.strip_prefix('.')?)?;

        let pre_release = if rest.is_empty() {
            None
        } else {
            Some(PreRelease::parse(rest)?)
        };

        Some(Self {
            major,
            minor,
            patch,
            pre_release,
        })
    }

    /// Extract the version from the output of `python -m esbonio --version`.
    ///
    /// Takes the first whitespace-separated token that parses as a version.
    pub fn from_probe_output(output: &str) -> Option<Self> {
        output.split_whitespace().find_map(Self::parse)
    }

    /// Check if this is a stable release (no pre-release tag).
    pub fn is_stable(&self) -> bool {
        self.pre_release.is_none()
    }
}

/// Split a leading run of ASCII digits off `s`.
fn split_number(s: &str) -> Option<(u32, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let n = s[..end].parse().ok()?;
    Some((n, &s[end..]))
}

/// Tag spellings, longest first where one is a prefix of another.
const PRE_RELEASE_TAGS: &[(&str, fn(u32) -> PreRelease)] = &[
    ("dev", PreRelease::Dev),
    ("alpha", PreRelease::Alpha),
    ("a", PreRelease::Alpha),
    ("beta", PreRelease::Beta),
    ("b", PreRelease::Beta),
    ("rc", PreRelease::Rc),
];

impl PreRelease {
    fn parse(s: &str) -> Option<Self> {
        let s = s
            .strip_prefix('-')
            .or_else(|| s.strip_prefix('.'))
            .unwrap_or(s);

        let (kind, rest) = PRE_RELEASE_TAGS
            .iter()
            .find_map(|&(tag, kind)| s.strip_prefix(tag).map(|rest| (kind, rest)))?;

        let rest = rest.strip_prefix('.').unwrap_or(rest);
        if rest.is_empty() {
            return Some(kind(0));
        }
        let (n, tail) = split_number(rest)?;
        tail.is_empty().then(|| kind(n))
    }

    fn rank(&self) -> (u8, u32) {
        match *self {
            PreRelease::Dev(n) => (0, n),
            PreRelease::Alpha(n) => (1, n),
            PreRelease::Beta(n) => (2, n),
            PreRelease::Rc(n) => (3, n),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.pre_release {
            write!(f, "{}", pre)?;
        }
        Ok(())
    }
}

impl fmt::Display for PreRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreRelease::Dev(n) => write!(f, ".dev{}", n),
            PreRelease::Alpha(n) => write!(f, "a{}", n),
            PreRelease::Beta(n) => write!(f, "b{}", n),
            PreRelease::Rc(n) => write!(f, "rc{}", n),
        }
    }
}

impl Ord for PreRelease {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for PreRelease {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch)) {
            Ordering::Equal => {}
            ord => return ord,
        }

        // Pre-release versions are less than release versions
        match (&self.pre_release, &other.pre_release) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
