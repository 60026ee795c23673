//! Installer Manifest Schema
//!
//! The manifest is the declarative input of the compiler. It is plain JSON:
//!
//! ```json
//! {
//!   "product": {
//!     "name": "Acme Editor",
//!     "manufacturer": "Acme Corp",
//!     "upgrade_code": "{3F2504E0-4F89-11D3-9A0C-0305E82C3301}",
//!     "version": "${version}"
//!   },
//!   "directories": [
//!     { "id": "INSTALLFOLDER", "name": "Acme Editor", "parent": "${program_files}" }
//!   ],
//!   "components": [
//!     {
//!       "id": "MainExecutable",
//!       "directory": "INSTALLFOLDER",
//!       "items": [
//!         { "kind": "file", "id": "AcmeExe", "source": "${binary}", "key_path": true }
//!       ]
//!     }
//!   ],
//!   "features": [
//!     { "id": "Core", "title": "Acme Editor", "level": 1, "components": ["MainExecutable"] }
//!   ]
//! }
//! ```
//!
//! String values may contain `${name}` templates; they are expanded by the
//! variable resolver before any validation runs. This module only knows the
//! shape of the document.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;
use crate::types::{
    EnvAction, EnvPart, ExecuteMode, FeatureDisplay, InstallScope, RegistryRoot,
    RegistryValueType, ReturnPolicy,
};

/// Stability key / product code value meaning "derive deterministically"
pub const AUTO_GUID: &str = "auto";

fn auto_guid() -> String {
    AUTO_GUID.to_string()
}

fn default_version_template() -> String {
    "${version}".to_string()
}

fn default_language() -> u16 {
    1033
}

fn default_codepage() -> u16 {
    1252
}

fn default_level() -> u16 {
    1
}

fn default_true() -> bool {
    true
}

fn default_verb() -> String {
    "open".to_string()
}

fn default_downgrade_message() -> String {
    "A newer version of [ProductName] is already installed.".to_string()
}

/// Root of the manifest document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub product: ProductDecl,

    #[serde(default)]
    pub directories: Vec<DirectoryDecl>,

    #[serde(default)]
    pub components: Vec<ComponentDecl>,

    #[serde(default)]
    pub features: Vec<FeatureDecl>,

    #[serde(default)]
    pub custom_actions: Vec<CustomActionDecl>,

    #[serde(default)]
    pub sequence: Vec<SequenceRuleDecl>,
}

/// Product identity and upgrade policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProductDecl {
    pub name: String,

    pub manufacturer: String,

    /// Fixed for the whole life of the product
    pub upgrade_code: String,

    /// `auto` derives a fresh code per version and platform
    #[serde(default = "auto_guid")]
    pub product_code: String,

    #[serde(default = "default_version_template")]
    pub version: String,

    #[serde(default = "default_language")]
    pub language: u16,

    #[serde(default = "default_codepage")]
    pub codepage: u16,

    #[serde(default)]
    pub scope: InstallScope,

    /// Features with `0 < level <= install_level` are installed by default
    #[serde(default = "default_level")]
    pub install_level: u16,

    #[serde(default)]
    pub upgrade: UpgradePolicy,

    /// Public properties, usable in guard conditions
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Major-upgrade behaviour handed to the installer engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UpgradePolicy {
    #[serde(default)]
    pub allow_downgrades: bool,

    #[serde(default)]
    pub allow_same_version_upgrades: bool,

    #[serde(default = "default_downgrade_message")]
    pub downgrade_error_message: String,
}

impl Default for UpgradePolicy {
    fn default() -> Self {
        Self {
            allow_downgrades: false,
            allow_same_version_upgrades: false,
            downgrade_error_message: default_downgrade_message(),
        }
    }
}

/// An install location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DirectoryDecl {
    pub id: String,

    pub name: String,

    /// Parent directory id; absent means directly under `TARGETDIR`
    #[serde(default)]
    pub parent: Option<String>,

    /// Pure grouping directory that holds no component of its own
    #[serde(default)]
    pub grouping: bool,
}

/// Atomic installable unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ComponentDecl {
    pub id: String,

    pub directory: String,

    /// Explicit GUID or `auto`
    #[serde(default = "auto_guid")]
    pub guid: String,

    /// Overrides the platform bitness for this component
    #[serde(default)]
    pub win64: Option<bool>,

    #[serde(default)]
    pub items: Vec<PayloadItem>,

    #[serde(default)]
    pub integrations: Vec<IntegrationDecl>,
}

/// One payload item of a component
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum PayloadItem {
    File {
        id: String,
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        key_path: bool,
    },
    Registry {
        id: String,
        root: RegistryRoot,
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        value: String,
        #[serde(default)]
        value_type: RegistryValueType,
        #[serde(default)]
        key_path: bool,
    },
    Environment {
        id: String,
        name: String,
        value: String,
        #[serde(default)]
        part: EnvPart,
        #[serde(default)]
        action: EnvAction,
        /// Must be stated explicitly: `false` removes the value on uninstall
        #[serde(default)]
        permanent: Option<bool>,
        #[serde(default = "default_true")]
        system: bool,
        #[serde(default)]
        key_path: bool,
    },
    Shortcut {
        id: String,
        name: String,
        /// File key the shortcut launches
        target: String,
        /// Directory the shortcut is created in
        directory: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_directory: Option<String>,
        /// File key of the icon source
        #[serde(default, skip_serializing_if = "Option::is_none")]
        icon: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
        #[serde(default)]
        key_path: bool,
    },
    RemoveFolder {
        id: String,
        directory: String,
        #[serde(default)]
        key_path: bool,
    },
}

impl PayloadItem {
    pub fn id(&self) -> &str {
        match self {
            Self::File { id, .. }
            | Self::Registry { id, .. }
            | Self::Environment { id, .. }
            | Self::Shortcut { id, .. }
            | Self::RemoveFolder { id, .. } => id,
        }
    }

    pub fn is_key_path(&self) -> bool {
        match self {
            Self::File { key_path, .. }
            | Self::Registry { key_path, .. }
            | Self::Environment { key_path, .. }
            | Self::Shortcut { key_path, .. }
            | Self::RemoveFolder { key_path, .. } => *key_path,
        }
    }

    /// Short kind tag, as written in the manifest
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::Registry { .. } => "registry",
            Self::Environment { .. } => "environment",
            Self::Shortcut { .. } => "shortcut",
            Self::RemoveFolder { .. } => "remove_folder",
        }
    }

    /// Only files and registry values can identify a component
    pub fn can_be_key_path(&self) -> bool {
        matches!(self, Self::File { .. } | Self::Registry { .. })
    }
}

/// High-level shell integration intent, expanded into payload items
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum IntegrationDecl {
    /// Add a directory to `PATH`
    Path {
        directory: String,
        #[serde(default)]
        part: EnvPart,
        #[serde(default)]
        permanent: Option<bool>,
        #[serde(default = "default_true")]
        system: bool,
    },
    /// Register a file extension with an open verb
    FileAssociation {
        extension: String,
        prog_id: String,
        /// File key of the handler executable
        target: String,
        #[serde(default)]
        description: Option<String>,
        /// File key of the icon source; defaults to `target`
        #[serde(default)]
        icon: Option<String>,
        #[serde(default = "default_verb")]
        verb: String,
        /// Defaults to `"[#target]" "%1"`
        #[serde(default)]
        command: Option<String>,
    },
    /// Start menu entry
    StartMenuShortcut {
        id: String,
        name: String,
        target: String,
        /// Defaults to `ProgramMenuFolder`
        #[serde(default)]
        folder: Option<String>,
        #[serde(default)]
        icon: Option<String>,
        #[serde(default)]
        working_directory: Option<String>,
        #[serde(default)]
        description: Option<String>,
        /// Add an HKCU registry value as the component key path
        #[serde(default)]
        registry_key_path: bool,
    },
}

/// User-selectable feature; features nest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FeatureDecl {
    pub id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    /// 0 = excluded by default
    #[serde(default = "default_level")]
    pub level: u16,

    /// Whether the user may deselect the feature
    #[serde(default = "default_true")]
    pub allow_absent: bool,

    #[serde(default)]
    pub display: FeatureDisplay,

    #[serde(default)]
    pub components: Vec<String>,

    #[serde(default)]
    pub children: Vec<FeatureDecl>,
}

/// Custom action launching a packaged file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CustomActionDecl {
    pub id: String,

    pub file_key: String,

    #[serde(default)]
    pub execute: ExecuteMode,

    #[serde(default = "default_true")]
    pub impersonate: bool,

    /// Required for deferred actions; immediate actions default to `check`
    #[serde(default, rename = "return")]
    pub return_policy: Option<ReturnPolicy>,

    #[serde(default)]
    pub arguments: String,
}

/// Ordering constraint of an action (or phase) against an anchor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SequenceRuleDecl {
    /// Custom action id or lifecycle phase name
    pub action: String,

    #[serde(default)]
    pub before: Option<String>,

    #[serde(default)]
    pub after: Option<String>,

    /// Guard evaluated by the installer at run time
    #[serde(default)]
    pub condition: Option<String>,
}

impl Manifest {
    /// Parse a manifest from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(json)?;
        Ok(manifest)
    }

    /// Load a manifest from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read manifest {:?}", path.as_ref()))?;

        let manifest = Self::from_json(&content)
            .with_context(|| format!("Failed to parse manifest {:?}", path.as_ref()))?;

        Ok(manifest)
    }

    /// Every file key declared anywhere in the manifest, in declaration order
    pub fn file_keys(&self) -> Vec<&str> {
        self.components
            .iter()
            .flat_map(|c| c.items.iter())
            .filter(|item| matches!(item, PayloadItem::File { .. }))
            .map(PayloadItem::id)
            .collect()
    }
}
