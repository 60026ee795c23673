//! Variable Resolver
//!
//! Translates the injected build values into the concrete scalars the rest of
//! the compiler consumes, and expands `${name}` templates in the manifest.
//!
//! # Design
//!
//! - **Closed platform set**: the selector parses into [`Platform`] and every
//!   platform maps to its values through one exhaustive `match`
//! - **Pure logic**: no I/O, no environment lookups, no global state
//! - **Recorded provenance**: every resolved scalar is kept as a
//!   [`PlatformVariable`] with the condition that produced it
//!
//! # Resolution Rules
//!
//! | Selector            | `win64` | `program_files`        |
//! |---------------------|---------|------------------------|
//! | `x64` / `64`        | `yes`   | `ProgramFiles64Folder` |
//! | `x86` / `32` / none | `no`    | `ProgramFilesFolder`   |
//!
//! # Template Names
//!
//! `version`, `platform`, `win64`, `program_files`, `profile`, `binary`,
//! `icon`, `license`, `banner`, `dialog`. `$${` produces a literal `${`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::BuildConfig;
use crate::error::CompileError;
use crate::manifest::{IntegrationDecl, Manifest, PayloadItem};
use crate::types::{Platform, StandardFolder};

// ============================================================================
// Platform Resolution
// ============================================================================

/// Concrete values produced by a platform selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformResolution {
    pub platform: Platform,
    pub win64: bool,
    pub program_files: StandardFolder,
}

impl PlatformResolution {
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::X86 => Self {
                platform,
                win64: false,
                program_files: StandardFolder::ProgramFilesFolder,
            },
            Platform::X64 => Self {
                platform,
                win64: true,
                program_files: StandardFolder::ProgramFiles64Folder,
            },
        }
    }
}

/// Resolve a platform selector. `None` (or blank) selects the default platform.
///
/// # Errors
///
/// [`CompileError::UnsupportedPlatform`] when the selector is outside the
/// closed set.
pub fn resolve_platform(selector: Option<&str>) -> Result<PlatformResolution, CompileError> {
    let platform = match selector.map(str::trim) {
        None | Some("") => Platform::default(),
        Some(s) => Platform::from_str(s).map_err(|_| CompileError::UnsupportedPlatform {
            selector: s.to_string(),
        })?,
    };
    Ok(PlatformResolution::for_platform(platform))
}

/// A resolved scalar and the condition that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformVariable {
    pub name: String,
    pub value: String,
    pub condition: String,
}

// ============================================================================
// Product Version
// ============================================================================

/// Installer product version: `major.minor.build[.revision]`.
///
/// The installer engine compares only the first three fields when detecting
/// upgrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProductVersion {
    pub major: u8,
    pub minor: u8,
    pub build: u16,
    pub revision: Option<u16>,
}

impl ProductVersion {
    /// Parse and range-check a fully expanded version string
    pub fn parse(version: &str) -> Result<Self, CompileError> {
        let malformed = |reason: String| CompileError::MalformedVersion {
            version: version.to_string(),
            reason,
        };

        let fields: Vec<&str> = version.split('.').collect();
        if fields.len() != 3 && fields.len() != 4 {
            return Err(malformed(format!(
                "expected 3 or 4 dot-separated fields, found {}",
                fields.len()
            )));
        }

        let mut numbers = Vec::with_capacity(fields.len());
        for field in &fields {
            if field.is_empty() || !field.chars().all(|c| c.is_ascii_digit()) {
                return Err(malformed(format!("field '{}' is not a decimal number", field)));
            }
            let n: u32 = field
                .parse()
                .map_err(|_| malformed(format!("field '{}' is out of range", field)))?;
            numbers.push(n);
        }

        let major = u8::try_from(numbers[0])
            .map_err(|_| malformed("major version must be at most 255".to_string()))?;
        let minor = u8::try_from(numbers[1])
            .map_err(|_| malformed("minor version must be at most 255".to_string()))?;
        let build = u16::try_from(numbers[2])
            .map_err(|_| malformed("build number must be at most 65535".to_string()))?;
        let revision = match numbers.get(3) {
            Some(&n) => Some(
                u16::try_from(n)
                    .map_err(|_| malformed("revision must be at most 65535".to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            major,
            minor,
            build,
            revision,
        })
    }
}

impl fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)?;
        if let Some(revision) = self.revision {
            write!(f, ".{}", revision)?;
        }
        Ok(())
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolved build-time values for one compile
#[derive(Debug, Clone)]
pub struct Resolver {
    resolution: PlatformResolution,
    version: ProductVersion,
    /// `None` marks a known name with no injected value
    values: BTreeMap<&'static str, Option<String>>,
    variables: Vec<PlatformVariable>,
}

impl Resolver {
    /// Resolve the injected values and the product version template.
    ///
    /// # Errors
    ///
    /// - [`CompileError::UnsupportedPlatform`] for an unknown selector
    /// - [`CompileError::MalformedTemplate`] / [`CompileError::MissingInjectedValue`]
    ///   if the version template cannot be expanded
    /// - [`CompileError::MalformedVersion`] if the expanded version is invalid
    pub fn new(config: &BuildConfig, version_template: &str) -> Result<Self, CompileError> {
        let resolution = resolve_platform(config.platform.as_deref())?;
        let platform_condition = format!("platform = {}", resolution.platform);

        let mut values: BTreeMap<&'static str, Option<String>> = BTreeMap::new();
        values.insert("version", Some(config.version.trim().to_string()));
        values.insert("platform", Some(resolution.platform.to_string()));
        values.insert("win64", Some(yes_no(resolution.win64).to_string()));
        values.insert("program_files", Some(resolution.program_files.to_string()));
        values.insert("profile", Some(config.profile.trim().to_string()));
        for (name, path) in config.assets() {
            values.insert(name, path.map(|p| p.display().to_string()));
        }

        let mut resolver = Self {
            resolution,
            version: ProductVersion {
                major: 0,
                minor: 0,
                build: 0,
                revision: None,
            },
            values,
            variables: Vec::new(),
        };

        let expanded = resolver.expand(version_template)?;
        resolver.version = ProductVersion::parse(&expanded)?;
        resolver
            .values
            .insert("version", Some(resolver.version.to_string()));

        let selector = config
            .platform
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("(default)");
        resolver.variables = vec![
            PlatformVariable {
                name: "platform".to_string(),
                value: resolution.platform.to_string(),
                condition: format!("selector = {}", selector),
            },
            PlatformVariable {
                name: "win64".to_string(),
                value: yes_no(resolution.win64).to_string(),
                condition: platform_condition.clone(),
            },
            PlatformVariable {
                name: "program_files".to_string(),
                value: resolution.program_files.to_string(),
                condition: platform_condition,
            },
            PlatformVariable {
                name: "version".to_string(),
                value: resolver.version.to_string(),
                condition: format!("template = {}", version_template),
            },
            PlatformVariable {
                name: "profile".to_string(),
                value: config.profile.trim().to_string(),
                condition: "injected".to_string(),
            },
        ];

        Ok(resolver)
    }

    pub fn resolution(&self) -> PlatformResolution {
        self.resolution
    }

    pub fn version(&self) -> ProductVersion {
        self.version
    }

    pub fn variables(&self) -> &[PlatformVariable] {
        &self.variables
    }

    /// Injected asset values, for names that were actually injected
    pub fn injected_assets(&self) -> BTreeMap<String, String> {
        ["icon", "license", "banner", "dialog"]
            .iter()
            .filter_map(|name| {
                self.values
                    .get(*name)
                    .and_then(|v| v.clone())
                    .map(|v| (name.to_string(), v))
            })
            .collect()
    }

    /// Expand every `${name}` in `template`
    pub fn expand(&self, template: &str) -> Result<String, CompileError> {
        let malformed = |reason: String| CompileError::MalformedTemplate {
            template: template.to_string(),
            reason,
        };

        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if let Some(after) = tail.strip_prefix("$${") {
                out.push_str("${");
                rest = after;
            } else if let Some(after) = tail.strip_prefix("${") {
                let end = after
                    .find('}')
                    .ok_or_else(|| malformed("unterminated '${'".to_string()))?;
                let name = &after[..end];
                if name.is_empty() {
                    return Err(malformed("empty variable name".to_string()));
                }
                match self.values.get(name) {
                    Some(Some(value)) => out.push_str(value),
                    Some(None) => {
                        return Err(CompileError::MissingInjectedValue {
                            name: name.to_string(),
                        });
                    }
                    None => return Err(malformed(format!("unknown variable '{}'", name))),
                }
                rest = &after[end + 1..];
            } else {
                out.push('$');
                rest = &tail[1..];
            }
        }

        out.push_str(rest);
        Ok(out)
    }

    fn expand_opt(&self, value: &Option<String>) -> Result<Option<String>, CompileError> {
        value.as_deref().map(|v| self.expand(v)).transpose()
    }

    /// Produce a copy of `manifest` with every templated field expanded.
    ///
    /// Identifiers are never templated; only display names, paths and values.
    pub fn expand_manifest(&self, manifest: &Manifest) -> Result<Manifest, CompileError> {
        let mut out = manifest.clone();

        let product = &mut out.product;
        product.name = self.expand(&product.name)?;
        product.manufacturer = self.expand(&product.manufacturer)?;
        product.version = self.version.to_string();
        product.upgrade.downgrade_error_message =
            self.expand(&product.upgrade.downgrade_error_message)?;
        for value in product.properties.values_mut() {
            *value = self.expand(value)?;
        }

        for dir in &mut out.directories {
            dir.name = self.expand(&dir.name)?;
            dir.parent = self.expand_opt(&dir.parent)?;
        }

        for component in &mut out.components {
            for item in &mut component.items {
                self.expand_item(item)?;
            }
            for integration in &mut component.integrations {
                self.expand_integration(integration)?;
            }
        }

        for action in &mut out.custom_actions {
            action.arguments = self.expand(&action.arguments)?;
        }

        Ok(out)
    }

    fn expand_item(&self, item: &mut PayloadItem) -> Result<(), CompileError> {
        match item {
            PayloadItem::File { source, name, .. } => {
                *source = self.expand(source)?;
                *name = self.expand_opt(name)?;
            }
            PayloadItem::Registry {
                key, name, value, ..
            } => {
                *key = self.expand(key)?;
                *name = self.expand_opt(name)?;
                *value = self.expand(value)?;
            }
            PayloadItem::Environment { value, .. } => {
                *value = self.expand(value)?;
            }
            PayloadItem::Shortcut {
                name,
                description,
                arguments,
                ..
            } => {
                *name = self.expand(name)?;
                *description = self.expand_opt(description)?;
                *arguments = self.expand_opt(arguments)?;
            }
            PayloadItem::RemoveFolder { .. } => {}
        }
        Ok(())
    }

    fn expand_integration(&self, integration: &mut IntegrationDecl) -> Result<(), CompileError> {
        match integration {
            IntegrationDecl::Path { .. } => {}
            IntegrationDecl::FileAssociation {
                description,
                command,
                ..
            } => {
                *description = self.expand_opt(description)?;
                *command = self.expand_opt(command)?;
            }
            IntegrationDecl::StartMenuShortcut {
                name, description, ..
            } => {
                *name = self.expand(name)?;
                *description = self.expand_opt(description)?;
            }
        }
        Ok(())
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(platform: Option<&str>) -> Resolver {
        let mut config = BuildConfig::new("2.4.1").with_binary("dist/acme.exe");
        config.platform = platform.map(str::to_string);
        Resolver::new(&config, "${version}").unwrap()
    }

    // =========================================================================
    // Platform Resolution Tests
    // =========================================================================

    #[test]
    fn test_x64_resolves_to_64bit_program_files() {
        let r = resolve_platform(Some("x64")).unwrap();
        assert!(r.win64);
        assert_eq!(r.program_files, StandardFolder::ProgramFiles64Folder);
    }

    #[test]
    fn test_x86_and_unspecified_resolve_to_default_program_files() {
        for selector in [Some("x86"), Some("32"), None, Some("")] {
            let r = resolve_platform(selector).unwrap();
            assert!(!r.win64);
            assert_eq!(r.program_files, StandardFolder::ProgramFilesFolder);
        }
    }

    #[test]
    fn test_unsupported_platform_is_fatal() {
        let err = resolve_platform(Some("arm64")).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnsupportedPlatform {
                selector: "arm64".to_string()
            }
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        assert_eq!(
            resolve_platform(Some("x64")).unwrap(),
            resolve_platform(Some("amd64")).unwrap()
        );
    }

    // =========================================================================
    // Version Tests
    // =========================================================================

    #[test]
    fn test_version_parsing() {
        let v = ProductVersion::parse("1.2.3").unwrap();
        assert_eq!((v.major, v.minor, v.build), (1, 2, 3));
        assert_eq!(v.revision, None);
        assert_eq!(v.to_string(), "1.2.3");

        let v = ProductVersion::parse("255.255.65535.65535").unwrap();
        assert_eq!(v.revision, Some(65535));
    }

    #[test]
    fn test_version_rejects_bad_shapes() {
        for bad in ["1.2", "1.2.3.4.5", "1..3", "1.2.x", "256.0.0", "1.0.70000", "-1.0.0"] {
            assert!(
                matches!(
                    ProductVersion::parse(bad),
                    Err(CompileError::MalformedVersion { .. })
                ),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_version_template_expansion() {
        let config = BuildConfig::new("3.1");
        let r = Resolver::new(&config, "${version}.7").unwrap();
        assert_eq!(r.version().to_string(), "3.1.7");
        assert_eq!(r.expand("v${version}").unwrap(), "v3.1.7");
    }

    #[test]
    fn test_malformed_version_from_injection() {
        let config = BuildConfig::new("latest");
        let err = Resolver::new(&config, "${version}").unwrap_err();
        assert!(matches!(err, CompileError::MalformedVersion { .. }));
    }

    // =========================================================================
    // Template Tests
    // =========================================================================

    #[test]
    fn test_expand_known_values() {
        let r = resolver(Some("x64"));
        assert_eq!(r.expand("${program_files}").unwrap(), "ProgramFiles64Folder");
        assert_eq!(r.expand("win64=${win64}").unwrap(), "win64=yes");
        assert_eq!(r.expand("${binary}").unwrap(), "dist/acme.exe");
        assert_eq!(r.expand("${profile}/${platform}").unwrap(), "release/x64");
        assert_eq!(r.expand("no templates").unwrap(), "no templates");
        assert_eq!(r.expand("cost: $5").unwrap(), "cost: $5");
    }

    #[test]
    fn test_expand_escape() {
        let r = resolver(None);
        assert_eq!(r.expand("$${version}").unwrap(), "${version}");
    }

    #[test]
    fn test_expand_errors() {
        let r = resolver(None);
        assert!(matches!(
            r.expand("${nope}"),
            Err(CompileError::MalformedTemplate { .. })
        ));
        assert!(matches!(
            r.expand("${version"),
            Err(CompileError::MalformedTemplate { .. })
        ));
        assert!(matches!(r.expand("${}"), Err(CompileError::MalformedTemplate { .. })));
        assert_eq!(
            r.expand("${icon}"),
            Err(CompileError::MissingInjectedValue {
                name: "icon".to_string()
            })
        );
    }

    #[test]
    fn test_variables_record_conditions() {
        let r = resolver(Some("x64"));
        let win64 = r.variables().iter().find(|v| v.name == "win64").unwrap();
        assert_eq!(win64.value, "yes");
        assert_eq!(win64.condition, "platform = x64");

        let r = resolver(None);
        let platform = r.variables().iter().find(|v| v.name == "platform").unwrap();
        assert_eq!(platform.value, "x86");
        assert_eq!(platform.condition, "selector = (default)");
    }

    #[test]
    fn test_injected_assets_only_lists_present_values() {
        let mut config = BuildConfig::new("1.0.0");
        config.license = Some("legal/eula.rtf".into());
        let r = Resolver::new(&config, "${version}").unwrap();
        let assets = r.injected_assets();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets.get("license").map(String::as_str), Some("legal/eula.rtf"));
    }
}
