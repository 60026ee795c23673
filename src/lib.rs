//! setupforge Library
//!
//! Compiles declarative installer manifests into validated, fully resolved
//! package descriptions for an external installer build engine.

pub mod cli;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod logic;
pub mod manifest;
pub mod types;
pub mod wxs;

// Re-export main types for convenience
pub use compiler::{compile, compile_file, ResolvedPackage, ResolvedProduct};
pub use config::BuildConfig;
pub use error::{CompileError, ErrorKind, SetupForgeError};
pub use manifest::Manifest;
pub use types::{
    EnvPart, ExecuteMode, FeatureDisplay, InstallScope, LifecyclePhase, Platform, RegistryRoot,
    ReturnPolicy, StandardFolder,
};

// Resolution passes
pub use engine::directories::DirectoryTree;
pub use engine::graph::{ComponentGraph, FeatureTree};
pub use engine::sequencer::{schedule, Schedule};
pub use logic::resolver::{resolve_platform, ProductVersion, Resolver};
