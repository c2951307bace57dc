//! Domain primitive types used across the Kiln workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A dotted numeric version such as `3.8`, `3.11.4`, `11.8` or `8`.
///
/// Ordering is component-wise, so `3.8 < 3.10` and `3.8 < 3.8.1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    parts: Vec<u32>,
}

impl Version {
    /// Parses a dotted numeric version. Returns `None` for anything else.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }
        let parts = trimmed
            .split('.')
            .map(|p| {
                if p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()) {
                    None
                } else {
                    p.parse::<u32>().ok()
                }
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self { parts })
    }

    /// Builds a version from its numeric components.
    #[must_use]
    pub fn from_parts(parts: &[u32]) -> Self {
        Self {
            parts: parts.to_vec(),
        }
    }

    /// Returns the major component.
    #[must_use]
    pub fn major(&self) -> u32 {
        self.parts.first().copied().unwrap_or_default()
    }

    /// Returns the minor component, if present.
    #[must_use]
    pub fn minor(&self) -> Option<u32> {
        self.parts.get(1).copied()
    }

    /// Returns the version truncated to at most `major.minor`.
    #[must_use]
    pub fn major_minor(&self) -> Self {
        Self {
            parts: self.parts.iter().take(2).copied().collect(),
        }
    }

    /// Returns `true` if every component of `prefix` matches this version.
    ///
    /// `11.8.0` has the prefixes `11`, `11.8` and `11.8.0`.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        prefix.parts.len() <= self.parts.len()
            && prefix.parts.iter().zip(&self.parts).all(|(a, b)| a == b)
    }

    /// Returns `true` if this version does not exceed `requested`.
    ///
    /// Components missing from `requested` act as wildcards, so every
    /// `11.x` satisfies a request for `11`.
    #[must_use]
    pub fn within(&self, requested: &Self) -> bool {
        self.starts_with(requested) || self < requested
    }

    /// Returns the numeric components.
    #[must_use]
    pub fn parts(&self) -> &[u32] {
        &self.parts
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.parts.iter().map(ToString::to_string).collect();
        write!(f, "{}", joined.join("."))
    }
}

impl TryFrom<String> for Version {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid version: {value:?}"))
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}

/// SHA-256 digest of an image layer, rendered as `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayerDigest(String);

impl LayerDigest {
    /// Creates a digest from a hex-encoded string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(hex: impl Into<String>) -> crate::error::Result<Self> {
        let hex = hex.into().to_ascii_lowercase();
        if hex.len() != crate::constants::SHA256_HEX_LENGTH
            || !hex.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(crate::error::KilnError::config(
                "last_layer",
                format!("invalid SHA-256 hex string: {hex}"),
            ));
        }
        Ok(Self(hex))
    }

    /// Wraps raw SHA-256 output bytes.
    #[must_use]
    pub fn from_digest(bytes: &[u8]) -> Self {
        use std::fmt::Write as _;
        let mut hex = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            let _ = write!(hex, "{b:02x}");
        }
        Self(hex)
    }

    /// Parses a `sha256:<hex>` reference (the prefix is optional).
    ///
    /// # Errors
    ///
    /// Returns an error if the hex part is not a valid SHA-256 digest.
    pub fn parse(value: &str) -> crate::error::Result<Self> {
        Self::from_hex(value.strip_prefix("sha256:").unwrap_or(value))
    }

    /// Returns the hex-encoded digest string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

impl TryFrom<String> for LayerDigest {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value).map_err(|e| e.to_string())
    }
}

impl From<LayerDigest> for String {
    fn from(value: LayerDigest) -> Self {
        value.to_string()
    }
}

/// An accelerator toolkit pair (CUDA + cuDNN).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Toolkit {
    /// CUDA toolkit version.
    pub cuda: Version,
    /// cuDNN library version.
    pub cudnn: Version,
}

impl fmt::Display for Toolkit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CUDA {} / cuDNN {}", self.cuda, self.cudnn)
    }
}
