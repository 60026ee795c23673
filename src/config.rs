//! Build configuration: the values injected into a compile pass.
//!
//! These come from the command line (each flag with a `SETUPFORGE_*`
//! environment fallback) and are validated before the manifest is touched.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SetupForgeError};

fn default_profile() -> String {
    "release".to_string()
}

/// Externally injected values for one compile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Platform selector; `None` means the default (32-bit) platform
    #[serde(default)]
    pub platform: Option<String>,

    /// Version substituted for `${version}`
    pub version: String,

    /// Build profile name (e.g. `release`, `debug`)
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Compiled application binary
    #[serde(default)]
    pub binary: Option<PathBuf>,

    #[serde(default)]
    pub icon: Option<PathBuf>,

    #[serde(default)]
    pub license: Option<PathBuf>,

    #[serde(default)]
    pub banner: Option<PathBuf>,

    #[serde(default)]
    pub dialog: Option<PathBuf>,
}

impl BuildConfig {
    /// Create a configuration with only a version set
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            platform: None,
            version: version.into(),
            profile: default_profile(),
            binary: None,
            icon: None,
            license: None,
            banner: None,
            dialog: None,
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    /// Validate the injected values themselves.
    ///
    /// Only checks shape. Version format and platform membership are domain
    /// rules owned by the resolver.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(SetupForgeError::config("Version must be specified"));
        }

        let profile = self.profile.trim();
        if profile.is_empty() {
            return Err(SetupForgeError::config("Build profile must not be empty"));
        }
        if !profile
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(SetupForgeError::config(
                "Build profile can only contain letters, numbers, '-' and '_'",
            ));
        }

        for (name, path) in self.assets() {
            if let Some(path) = path {
                if path.as_os_str().is_empty() {
                    return Err(SetupForgeError::config(format!(
                        "Asset path for '{}' must not be empty",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Asset paths keyed by their template name
    pub fn assets(&self) -> [(&'static str, Option<&Path>); 5] {
        [
            ("binary", self.binary.as_deref()),
            ("icon", self.icon.as_deref()),
            ("license", self.license.as_deref()),
            ("banner", self.banner.as_deref()),
            ("dialog", self.dialog.as_deref()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_has_release_profile() {
        let config = BuildConfig::new("1.2.3");
        assert_eq!(config.profile, "release");
        assert!(config.platform.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_version_rejected() {
        let config = BuildConfig::new("  ");
        assert!(matches!(config.validate(), Err(SetupForgeError::Config(_))));
    }

    #[test]
    fn test_profile_charset() {
        assert!(BuildConfig::new("1.0.0").with_profile("release-lto").validate().is_ok());
        assert!(BuildConfig::new("1.0.0").with_profile("rel ease").validate().is_err());
        assert!(BuildConfig::new("1.0.0").with_profile("").validate().is_err());
    }

    #[test]
    fn test_assets_listing() {
        let config = BuildConfig::new("1.0.0").with_binary("target/release/acme.exe");
        let assets = config.assets();
        assert_eq!(assets[0].0, "binary");
        assert_eq!(assets[0].1, Some(Path::new("target/release/acme.exe")));
        assert!(assets[1].1.is_none());
    }
}
