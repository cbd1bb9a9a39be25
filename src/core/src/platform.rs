//! Platform triples.
//!
//! Parses and formats `os/arch[/variant]` strings such as `linux/amd64` and
//! `linux/arm/v7`, with the architecture aliasing Docker tooling expects.

use crate::error::{FrontendError, Result};
use serde::{Deserialize, Serialize};

/// A normalized platform triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system (e.g., "linux")
    pub os: String,
    /// CPU architecture (e.g., "amd64", "arm64")
    pub architecture: String,
    /// Architecture variant (e.g., "v7"), when relevant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// Construct a linux platform for the given architecture.
    pub fn linux(architecture: &str) -> Self {
        Platform {
            os: "linux".to_string(),
            architecture: normalize_arch(architecture),
            variant: None,
        }
    }

    /// Parse a platform expression.
    ///
    /// Accepts `os/arch`, `os/arch/variant`, and a bare architecture (which
    /// defaults the OS to "linux").
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(FrontendError::validation("empty platform expression"));
        }

        let parts: Vec<&str> = spec.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(FrontendError::validation(format!(
                "invalid platform expression {:?}",
                spec
            )));
        }

        match parts.as_slice() {
            [arch] => Ok(Platform::linux(arch)),
            [os, arch] => Ok(Platform {
                os: os.to_lowercase(),
                architecture: normalize_arch(arch),
                variant: None,
            }),
            [os, arch, variant] => Ok(Platform {
                os: os.to_lowercase(),
                architecture: normalize_arch(arch),
                variant: Some(variant.to_lowercase()),
            }),
            _ => Err(FrontendError::validation(format!(
                "invalid platform expression {:?}",
                spec
            ))),
        }
    }

    /// The platform of the host running the compiler.
    pub fn host() -> Self {
        Platform::linux(std::env::consts::ARCH)
    }
}

/// Map Rust/uname architecture names onto Docker's.
fn normalize_arch(arch: &str) -> String {
    match arch {
        "x86_64" => "amd64".to_string(),
        "aarch64" => "arm64".to_string(),
        other => other.to_lowercase(),
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(ref variant) = self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_os_arch() {
        let p = Platform::parse("linux/amd64").unwrap();
        assert_eq!(p.os, "linux");
        assert_eq!(p.architecture, "amd64");
        assert_eq!(p.variant, None);
    }

    #[test]
    fn test_parse_with_variant() {
        let p = Platform::parse("linux/arm/v7").unwrap();
        assert_eq!(p.architecture, "arm");
        assert_eq!(p.variant, Some("v7".to_string()));
    }

    #[test]
    fn test_parse_bare_arch_defaults_linux() {
        let p = Platform::parse("arm64").unwrap();
        assert_eq!(p.os, "linux");
        assert_eq!(p.architecture, "arm64");
    }

    #[test]
    fn test_parse_aliases_uname_arches() {
        assert_eq!(Platform::parse("linux/x86_64").unwrap().architecture, "amd64");
        assert_eq!(Platform::parse("linux/aarch64").unwrap().architecture, "arm64");
    }

    #[test]
    fn test_parse_empty_rejected() {
        assert!(Platform::parse("").is_err());
        assert!(Platform::parse("linux//v7").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let p = Platform::parse("linux/arm/v7").unwrap();
        assert_eq!(p.to_string(), "linux/arm/v7");
    }
}
