//! Versioned identity policy for components and products.
//!
//! Auto-generated identities are UUID v5 values in the product's upgrade-code
//! namespace, so the same inputs always produce the same GUID:
//!
//! - component stability key = v5(upgrade code, key-path identity)
//! - product code            = v5(upgrade code, `product|<version>|<platform>`)
//!
//! The key-path identity is `kind|directory|target`, which changes exactly
//! when the key-path item changes (including a change of item kind).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CompileError;
use crate::logic::resolver::ProductVersion;
use crate::manifest::{PayloadItem, AUTO_GUID};
use crate::types::Platform;

/// How a component's stability key was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilityPolicy {
    /// Derived from the key-path identity
    Auto,
    /// Declared in the manifest
    Explicit,
}

/// Parse a GUID in plain or braced form.
pub fn parse_guid(owner: &str, value: &str) -> Result<Uuid, CompileError> {
    let trimmed = value.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed);

    match Uuid::parse_str(inner) {
        Ok(uuid) if !uuid.is_nil() => Ok(uuid),
        _ => Err(CompileError::InvalidGuid {
            owner: owner.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Canonical installer spelling: braced, upper case
pub fn format_guid(uuid: &Uuid) -> String {
    format!("{{{}}}", uuid.hyphenated().to_string().to_uppercase())
}

/// Identity string of a key-path item installed under `install_path`, the
/// resolved directory path (`[ProgramFiles64Folder]\Acme\Editor`).
///
/// Paths compare case-insensitively, as on the target system. Returns `None`
/// for items that cannot be key paths.
pub fn key_path_identity(install_path: &str, item: &PayloadItem) -> Option<String> {
    match item {
        PayloadItem::File { source, name, .. } => {
            let file_name = name.clone().unwrap_or_else(|| file_name_of(source).to_string());
            Some(format!(
                "{}|{}|{}",
                item.kind(),
                install_path.to_lowercase(),
                file_name.to_lowercase()
            ))
        }
        PayloadItem::Registry { root, key, name, .. } => Some(format!(
            "{}|{}|{}|{}",
            item.kind(),
            root,
            key.to_lowercase(),
            name.as_deref().unwrap_or("").to_lowercase()
        )),
        PayloadItem::Environment { .. }
        | PayloadItem::Shortcut { .. }
        | PayloadItem::RemoveFolder { .. } => None,
    }
}

/// Final path segment of a source path, accepting either separator
pub fn file_name_of(source: &str) -> &str {
    source.rsplit(['/', '\\']).next().unwrap_or(source)
}

/// Resolve a component's stability key.
///
/// `auto` derives the key from the key-path identity; anything else must be a
/// valid GUID.
pub fn stability_key(
    component: &str,
    declared: &str,
    upgrade_code: &Uuid,
    key_path_identity: &str,
) -> Result<(Uuid, StabilityPolicy), CompileError> {
    if declared.trim().eq_ignore_ascii_case(AUTO_GUID) {
        let uuid = Uuid::new_v5(upgrade_code, key_path_identity.as_bytes());
        Ok((uuid, StabilityPolicy::Auto))
    } else {
        Ok((parse_guid(component, declared)?, StabilityPolicy::Explicit))
    }
}

/// Resolve the product code; `auto` derives one per version and platform
pub fn product_code(
    declared: &str,
    upgrade_code: &Uuid,
    version: &ProductVersion,
    platform: Platform,
) -> Result<Uuid, CompileError> {
    if declared.trim().eq_ignore_ascii_case(AUTO_GUID) {
        let name = format!("product|{}|{}", version, platform);
        Ok(Uuid::new_v5(upgrade_code, name.as_bytes()))
    } else {
        parse_guid("product_code", declared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RegistryRoot, RegistryValueType};

    const UPGRADE: &str = "{3F2504E0-4F89-11D3-9A0C-0305E82C3301}";

    fn file(source: &str) -> PayloadItem {
        PayloadItem::File {
            id: "AppExe".into(),
            source: source.into(),
            name: None,
            key_path: true,
        }
    }

    #[test]
    fn test_parse_guid_forms() {
        let braced = parse_guid("x", UPGRADE).unwrap();
        let plain = parse_guid("x", "3f2504e0-4f89-11d3-9a0c-0305e82c3301").unwrap();
        assert_eq!(braced, plain);
        assert_eq!(format_guid(&braced), UPGRADE);
    }

    #[test]
    fn test_parse_guid_rejects_garbage_and_nil() {
        assert!(matches!(
            parse_guid("Main", "not-a-guid"),
            Err(CompileError::InvalidGuid { .. })
        ));
        assert!(parse_guid("Main", "{00000000-0000-0000-0000-000000000000}").is_err());
    }

    #[test]
    fn test_file_identity_uses_file_name_only() {
        let a = key_path_identity("[ProgramFilesFolder]\\Acme", &file("target/release/acme.exe")).unwrap();
        let b = key_path_identity("[ProgramFilesFolder]\\ACME", &file("C:\\build\\debug\\ACME.exe")).unwrap();
        assert_eq!(a, "file|[programfilesfolder]\\acme|acme.exe");
        assert_eq!(a, b);
    }

    #[test]
    fn test_file_identity_tracks_install_location() {
        let x86 = key_path_identity("[ProgramFilesFolder]\\Acme", &file("acme.exe")).unwrap();
        let x64 = key_path_identity("[ProgramFiles64Folder]\\Acme", &file("acme.exe")).unwrap();
        let renamed = key_path_identity("[ProgramFilesFolder]\\Acme Corp", &file("acme.exe")).unwrap();
        assert_ne!(x86, x64);
        assert_ne!(x86, renamed);
    }

    #[test]
    fn test_registry_identity() {
        let item = PayloadItem::Registry {
            id: "Installed".into(),
            root: RegistryRoot::Hkcu,
            key: "Software\\Acme\\Editor".into(),
            name: Some("installed".into()),
            value: "1".into(),
            value_type: RegistryValueType::Integer,
            key_path: true,
        };
        assert_eq!(
            key_path_identity("ProgramMenuFolder", &item).unwrap(),
            "registry|HKCU|software\\acme\\editor|installed"
        );
    }

    #[test]
    fn test_auto_stability_key_is_deterministic_and_tracks_key_path() {
        let upgrade = parse_guid("upgrade", UPGRADE).unwrap();
        let (a, policy) = stability_key("Main", "auto", &upgrade, "file|INSTALLFOLDER|acme.exe").unwrap();
        let (b, _) = stability_key("Main", "auto", &upgrade, "file|INSTALLFOLDER|acme.exe").unwrap();
        let (c, _) = stability_key("Main", "auto", &upgrade, "file|INSTALLFOLDER|acme2.exe").unwrap();

        assert_eq!(policy, StabilityPolicy::Auto);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_explicit_stability_key() {
        let upgrade = parse_guid("upgrade", UPGRADE).unwrap();
        let explicit = "{6BA7B810-9DAD-11D1-80B4-00C04FD430C8}";
        let (key, policy) = stability_key("Main", explicit, &upgrade, "ignored").unwrap();
        assert_eq!(policy, StabilityPolicy::Explicit);
        assert_eq!(format_guid(&key), explicit);
    }

    #[test]
    fn test_product_code_changes_with_version_and_platform() {
        let upgrade = parse_guid("upgrade", UPGRADE).unwrap();
        let v1 = ProductVersion::parse("1.0.0").unwrap();
        let v2 = ProductVersion::parse("1.0.1").unwrap();

        let a = product_code("auto", &upgrade, &v1, Platform::X64).unwrap();
        assert_eq!(a, product_code("auto", &upgrade, &v1, Platform::X64).unwrap());
        assert_ne!(a, product_code("auto", &upgrade, &v2, Platform::X64).unwrap());
        assert_ne!(a, product_code("auto", &upgrade, &v1, Platform::X86).unwrap());
    }
}
