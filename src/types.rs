//! Type-safe closed sets used throughout the manifest compiler
//!
//! Every selector that the installer engine understands is modelled as an enum
//! so that unsupported values are rejected at the parsing boundary and every
//! later `match` is exhaustive.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Target platform selector.
///
/// The closed set of supported bitness targets. Aliases accepted on parse:
/// `32`/`win32`/`i386` and `64`/`amd64`/`x86_64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Platform {
    #[default]
    #[strum(to_string = "x86", serialize = "32", serialize = "win32", serialize = "i386")]
    X86,
    #[strum(to_string = "x64", serialize = "64", serialize = "amd64", serialize = "x86_64")]
    X64,
}

/// Well-known folders the installer engine resolves at install time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum StandardFolder {
    #[strum(serialize = "TARGETDIR")]
    #[serde(rename = "TARGETDIR")]
    TargetDir,
    ProgramFilesFolder,
    ProgramFiles64Folder,
    ProgramMenuFolder,
    DesktopFolder,
    LocalAppDataFolder,
    CommonAppDataFolder,
}

/// Whether the package installs for every user or the invoking user only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum InstallScope {
    #[default]
    PerMachine,
    PerUser,
}

/// Registry hive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum RegistryRoot {
    Hklm,
    Hkcu,
    Hkcr,
    Hku,
    /// HKLM for per-machine installs, HKCU for per-user installs
    Hkmu,
}

/// Registry value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RegistryValueType {
    #[default]
    String,
    Integer,
    Expandable,
    Multistring,
}

/// Where an environment mutation places its value in an existing list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EnvPart {
    /// Prepend to the existing value
    First,
    /// Append to the existing value
    #[default]
    Last,
    /// Replace the whole value
    All,
}

/// Environment mutation action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EnvAction {
    #[default]
    Set,
    Create,
    Remove,
}

/// Custom action execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecuteMode {
    #[default]
    Immediate,
    Deferred,
    Commit,
    Rollback,
}

impl ExecuteMode {
    /// Actions that run inside the installation script, between
    /// `InstallInitialize` and `InstallFinalize`.
    pub fn is_in_script(&self) -> bool {
        matches!(self, Self::Deferred | Self::Commit | Self::Rollback)
    }
}

/// How the installer waits on a custom action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReturnPolicy {
    /// Synchronous, failure aborts the install
    Check,
    /// Synchronous, exit code ignored
    Ignore,
    /// Asynchronous, waits before the install completes
    AsyncWait,
    /// Fire-and-forget
    AsyncNoWait,
}

/// How a feature is presented in the selection tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FeatureDisplay {
    Collapse,
    #[default]
    Expand,
    Hidden,
}

/// Standard installer lifecycle phases, in execution order.
///
/// The discriminant is the sequence number the installer engine assigns to the
/// standard action, so custom actions can be numbered into the gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[repr(u32)]
pub enum LifecyclePhase {
    CostInitialize = 800,
    CostFinalize = 1000,
    InstallValidate = 1400,
    InstallInitialize = 1500,
    ProcessComponents = 1600,
    UnpublishFeatures = 1800,
    RemoveRegistryValues = 2600,
    RemoveShortcuts = 3200,
    RemoveFiles = 3500,
    InstallFiles = 4000,
    CreateShortcuts = 4500,
    WriteRegistryValues = 5000,
    WriteEnvironmentStrings = 5200,
    RegisterProduct = 6100,
    PublishFeatures = 6300,
    PublishProduct = 6400,
    InstallFinalize = 6600,
}

impl LifecyclePhase {
    pub fn sequence_number(&self) -> u32 {
        *self as u32
    }
}
