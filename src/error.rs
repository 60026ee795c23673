//! Error handling for the manifest compiler
//!
//! Two layers:
//! - [`CompileError`]: every fatal rule violation found while resolving a
//!   manifest. Each variant names the offending identifier.
//! - [`SetupForgeError`]: the crate-level error wrapping IO, parsing, output
//!   rendering and compile failures.
//!
//! There are no warnings. Every compile error aborts the pass.

use strum::Display;
use thiserror::Error;

/// Broad class of a compile error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ErrorKind {
    /// An identifier does not resolve to a declaration
    Reference,
    /// A structural rule of the data model is broken
    Invariant,
    /// Sequencing rules cannot be satisfied
    Ordering,
    /// An injected value or template is outside its domain
    Domain,
}

/// Fatal errors raised during a compile pass
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    // Domain
    #[error("Unsupported platform selector '{selector}' (supported: x86, x64)")]
    UnsupportedPlatform { selector: String },

    #[error("Malformed template '{template}': {reason}")]
    MalformedTemplate { template: String, reason: String },

    #[error("Malformed version '{version}': {reason}")]
    MalformedVersion { version: String, reason: String },

    #[error("Template references '{name}' but no value was injected for it")]
    MissingInjectedValue { name: String },

    #[error("Upgrade code changed from {previous} to {current}; it must stay fixed for the life of the product")]
    UpgradeCodeChanged { previous: String, current: String },

    #[error("Component '{component}' keeps stability key {guid} but its key path changed; assign a new key or use \"auto\"")]
    StaleStabilityKey { component: String, guid: String },

    // Invariants
    #[error("Directory id '{id}' is declared more than once")]
    DuplicateDirectoryId { id: String },

    #[error("Directory '{id}' is not used by any component or shortcut and is not marked as a grouping directory")]
    UnusedDirectory { id: String },

    #[error("Component id '{id}' is declared more than once")]
    DuplicateComponentId { id: String },

    #[error("Payload item id '{id}' is declared more than once")]
    DuplicateItemId { id: String },

    #[error("Feature id '{id}' is declared more than once")]
    DuplicateFeatureId { id: String },

    #[error("Custom action id '{id}' is declared more than once or collides with a lifecycle phase")]
    DuplicateActionId { id: String },

    #[error("Component '{component}' has no key path item")]
    MissingKeyPath { component: String },

    #[error("Component '{component}' has more than one key path item: {}", .items.join(", "))]
    MultipleKeyPaths { component: String, items: Vec<String> },

    #[error("Item '{item}' in component '{component}' cannot be a key path (only files and registry values can)")]
    KeyPathNotAllowed { component: String, item: String },

    #[error("'{owner}' has an invalid GUID '{value}'")]
    InvalidGuid { owner: String, value: String },

    #[error("PATH/environment mutation '{item}' in component '{component}' must declare whether it is permanent")]
    MissingPermanenceFlag { component: String, item: String },

    #[error("Deferred custom action '{action}' must declare a return policy (check, ignore, async_wait or async_no_wait)")]
    MissingReturnPolicy { action: String },

    #[error("Sequence rule for '{action}' is invalid: {reason}")]
    InvalidSequenceRule { action: String, reason: String },

    #[error("Custom action '{action}' is declared but never sequenced")]
    UnscheduledAction { action: String },

    #[error("Guard condition of '{action}' is malformed: {reason}")]
    MalformedGuard { action: String, reason: String },

    #[error("Guard condition of '{action}' depends on the action's own outcome")]
    GuardDependsOnAction { action: String },

    // References
    #[error("Directory '{directory}' names parent '{parent}', which is not declared")]
    DanglingParentReference { directory: String, parent: String },

    #[error("'{owner}' references directory '{directory}', which is not declared")]
    DanglingDirectoryRef { owner: String, directory: String },

    #[error("Feature '{feature}' references component '{component}', which is not declared")]
    UnresolvedComponentRef { feature: String, component: String },

    #[error("Component '{component}' is not referenced by any feature")]
    OrphanComponent { component: String },

    #[error("'{owner}' references file key '{file_key}', which is not a declared file")]
    UnresolvedFileKey { owner: String, file_key: String },

    #[error("Sequence rule references '{action}', which is neither a custom action nor a lifecycle phase")]
    UnknownAction { action: String },

    #[error("Guard condition of '{action}' references unknown state variable '{variable}'")]
    UnknownGuardVariable { action: String, variable: String },

    // Ordering
    #[error("Sequencing rules contradict each other: {}", .cycle.join(" -> "))]
    OrderingContradiction { cycle: Vec<String> },

    #[error("In-script custom action '{action}' must be sequenced between InstallInitialize and InstallFinalize")]
    DeferredOutsideScript { action: String },

    #[error("Too many custom actions sequenced after '{anchor}' to fit before the next phase")]
    SequenceGapExhausted { anchor: String },
}

impl CompileError {
    /// The class this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedPlatform { .. }
            | Self::MalformedTemplate { .. }
            | Self::MalformedVersion { .. }
            | Self::MissingInjectedValue { .. }
            | Self::UpgradeCodeChanged { .. }
            | Self::StaleStabilityKey { .. } => ErrorKind::Domain,

            Self::DuplicateDirectoryId { .. }
            | Self::UnusedDirectory { .. }
            | Self::DuplicateComponentId { .. }
            | Self::DuplicateItemId { .. }
            | Self::DuplicateFeatureId { .. }
            | Self::DuplicateActionId { .. }
            | Self::MissingKeyPath { .. }
            | Self::MultipleKeyPaths { .. }
            | Self::KeyPathNotAllowed { .. }
            | Self::InvalidGuid { .. }
            | Self::MissingPermanenceFlag { .. }
            | Self::MissingReturnPolicy { .. }
            | Self::InvalidSequenceRule { .. }
            | Self::UnscheduledAction { .. }
            | Self::MalformedGuard { .. }
            | Self::GuardDependsOnAction { .. } => ErrorKind::Invariant,

            Self::DanglingParentReference { .. }
            | Self::DanglingDirectoryRef { .. }
            | Self::UnresolvedComponentRef { .. }
            | Self::OrphanComponent { .. }
            | Self::UnresolvedFileKey { .. }
            | Self::UnknownAction { .. }
            | Self::UnknownGuardVariable { .. } => ErrorKind::Reference,

            Self::OrderingContradiction { .. }
            | Self::DeferredOutsideScript { .. }
            | Self::SequenceGapExhausted { .. } => ErrorKind::Ordering,
        }
    }

    /// Stable name of the violated rule, used in CLI diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Self::UnsupportedPlatform { .. } => "UnsupportedPlatform",
            Self::MalformedTemplate { .. } => "MalformedTemplate",
            Self::MalformedVersion { .. } => "MalformedVersion",
            Self::MissingInjectedValue { .. } => "MissingInjectedValue",
            Self::UpgradeCodeChanged { .. } => "UpgradeCodeChanged",
            Self::StaleStabilityKey { .. } => "StaleStabilityKey",
            Self::DuplicateDirectoryId { .. } => "DuplicateDirectoryId",
            Self::UnusedDirectory { .. } => "UnusedDirectory",
            Self::DuplicateComponentId { .. } => "DuplicateComponentId",
            Self::DuplicateItemId { .. } => "DuplicateItemId",
            Self::DuplicateFeatureId { .. } => "DuplicateFeatureId",
            Self::DuplicateActionId { .. } => "DuplicateActionId",
            Self::MissingKeyPath { .. } => "MissingKeyPath",
            Self::MultipleKeyPaths { .. } => "MultipleKeyPaths",
            Self::KeyPathNotAllowed { .. } => "KeyPathNotAllowed",
            Self::InvalidGuid { .. } => "InvalidGuid",
            Self::MissingPermanenceFlag { .. } => "MissingPermanenceFlag",
            Self::MissingReturnPolicy { .. } => "MissingReturnPolicy",
            Self::InvalidSequenceRule { .. } => "InvalidSequenceRule",
            Self::UnscheduledAction { .. } => "UnscheduledAction",
            Self::MalformedGuard { .. } => "MalformedGuard",
            Self::GuardDependsOnAction { .. } => "GuardDependsOnAction",
            Self::DanglingParentReference { .. } => "DanglingParentReference",
            Self::DanglingDirectoryRef { .. } => "DanglingDirectoryRef",
            Self::UnresolvedComponentRef { .. } => "UnresolvedComponentRef",
            Self::OrphanComponent { .. } => "OrphanComponent",
            Self::UnresolvedFileKey { .. } => "UnresolvedFileKey",
            Self::UnknownAction { .. } => "UnknownAction",
            Self::UnknownGuardVariable { .. } => "UnknownGuardVariable",
            Self::OrderingContradiction { .. } => "OrderingContradiction",
            Self::DeferredOutsideScript { .. } => "DeferredOutsideScript",
            Self::SequenceGapExhausted { .. } => "SequenceGapExhausted",
        }
    }
}

/// Main error type for setupforge
#[derive(Error, Debug)]
pub enum SetupForgeError {
    /// IO errors (reading manifests, writing outputs)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WiX source rendering errors
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Build configuration errors (injected values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Manifest compile errors
    #[error("{}[{}]: {}", .0.kind(), .0.name(), .0)]
    Compile(#[from] CompileError),
}

/// Result type alias for setupforge operations
pub type Result<T> = std::result::Result<T, SetupForgeError>;

impl SetupForgeError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// The compile error, if this is one
    pub fn as_compile(&self) -> Option<&CompileError> {
        match self {
            Self::Compile(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CompileError::MissingKeyPath {
            component: "MainExe".to_string(),
        };
        assert_eq!(err.to_string(), "Component 'MainExe' has no key path item");

        let err = CompileError::OrderingContradiction {
            cycle: vec!["A".into(), "InstallFinalize".into(), "A".into()],
        };
        assert!(err.to_string().contains("A -> InstallFinalize -> A"));
    }

    #[test]
    fn test_error_kinds() {
        let err = CompileError::UnsupportedPlatform {
            selector: "arm64".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Domain);

        let err = CompileError::UnresolvedComponentRef {
            feature: "Main".into(),
            component: "Missing".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Reference);

        let err = CompileError::MissingPermanenceFlag {
            component: "Env".into(),
            item: "PathEnv".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Invariant);
        assert_eq!(err.name(), "MissingPermanenceFlag");
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::Reference.to_string(), "reference");
        assert_eq!(ErrorKind::Ordering.to_string(), "ordering");
    }

    #[test]
    fn test_compile_error_conversion_names_rule() {
        let err: SetupForgeError = CompileError::DuplicateDirectoryId {
            id: "INSTALLFOLDER".into(),
        }
        .into();
        let msg = err.to_string();
        assert!(msg.starts_with("invariant[DuplicateDirectoryId]"));
        assert!(msg.contains("INSTALLFOLDER"));
        assert!(err.as_compile().is_some());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SetupForgeError = io_err.into();
        assert!(matches!(err, SetupForgeError::Io(_)));
        assert!(err.as_compile().is_none());
    }
}
