//! Manifest Compiler
//!
//! Ties the resolution passes into one forward pass:
//!
//! ```text
//! BuildConfig ─► Resolver ─► expanded Manifest ─► DirectoryTree
//!                                              └► ComponentGraph (integrations)
//!                                                 └► Schedule (guards)
//!                                                    └► ResolvedPackage
//! ```
//!
//! The pass is pure: no I/O, no shared state. The same manifest and build
//! configuration always yield byte-identical JSON and the same fingerprint.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

use crate::config::BuildConfig;
use crate::engine::condition::GuardScope;
use crate::engine::directories::{DirectoryTree, ResolvedDirectory};
use crate::engine::graph::{ComponentGraph, GraphContext, ResolvedComponent, ResolvedFeature};
use crate::engine::sequencer::{self, ResolvedAction, ScheduledStep};
use crate::error::{CompileError, Result};
use crate::identity::{self, format_guid, parse_guid};
use crate::logic::resolver::{PlatformVariable, Resolver};
use crate::manifest::{Manifest, UpgradePolicy};
use crate::types::{InstallScope, Platform};

/// Schema version of the resolved output
pub const FORMAT_VERSION: u32 = 1;

// ============================================================================
// Resolved Output
// ============================================================================

/// Product identity after resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedProduct {
    pub name: String,
    pub manufacturer: String,
    pub upgrade_code: String,
    pub product_code: String,
    pub version: String,
    pub platform: Platform,
    pub win64: bool,
    pub program_files: String,
    pub language: u16,
    pub codepage: u16,
    pub scope: InstallScope,
    pub install_level: u16,
    pub upgrade: UpgradePolicy,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    /// Injected UI assets by name (`icon`, `license`, `banner`, `dialog`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub assets: BTreeMap<String, String>,
}

/// Immutable, fully resolved installer description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPackage {
    pub format_version: u32,
    pub product: ResolvedProduct,
    pub variables: Vec<PlatformVariable>,
    pub directories: Vec<ResolvedDirectory>,
    pub components: Vec<ResolvedComponent>,
    pub features: Vec<ResolvedFeature>,
    pub default_features: Vec<String>,
    pub default_components: Vec<String>,
    pub custom_actions: Vec<ResolvedAction>,
    pub sequence: Vec<ScheduledStep>,
}

impl ResolvedPackage {
    /// Canonical serialization: pretty JSON with a trailing newline
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// SHA-256 of the canonical serialization, hex encoded
    pub fn fingerprint(&self) -> Result<String> {
        let json = self.to_json()?;
        Ok(hex::encode(Sha256::digest(json.as_bytes())))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a previously emitted package to compare against
    pub fn load_baseline<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read baseline {:?}", path.as_ref()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse baseline {:?}", path.as_ref()))
    }

    /// Enforce the cross-version rules against an earlier build.
    ///
    /// # Errors
    ///
    /// - [`CompileError::UpgradeCodeChanged`] when the upgrade code differs
    /// - [`CompileError::StaleStabilityKey`] when a stability key carried over
    ///   from the baseline now identifies a different key path
    pub fn check_baseline(&self, baseline: &ResolvedPackage) -> std::result::Result<(), CompileError> {
        if !self
            .product
            .upgrade_code
            .eq_ignore_ascii_case(&baseline.product.upgrade_code)
        {
            return Err(CompileError::UpgradeCodeChanged {
                previous: baseline.product.upgrade_code.clone(),
                current: self.product.upgrade_code.clone(),
            });
        }

        let previous: HashMap<&str, &ResolvedComponent> = baseline
            .components
            .iter()
            .map(|c| (c.guid.as_str(), c))
            .collect();

        for component in &self.components {
            if let Some(old) = previous.get(component.guid.as_str()) {
                if old.key_path_identity != component.key_path_identity {
                    return Err(CompileError::StaleStabilityKey {
                        component: component.id.clone(),
                        guid: component.guid.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// Compile Pass
// ============================================================================

/// Resolve and validate `manifest` against the injected values.
///
/// Stops at the first violated rule.
pub fn compile(manifest: &Manifest, config: &BuildConfig) -> std::result::Result<ResolvedPackage, CompileError> {
    info!("Compiling manifest for '{}'", manifest.product.name);

    let resolver = Resolver::new(config, &manifest.product.version)?;
    let resolution = resolver.resolution();
    debug!(
        "Resolved platform {} (win64={}, base={}), version {}",
        resolution.platform,
        resolution.win64,
        resolution.program_files,
        resolver.version()
    );

    let manifest = resolver.expand_manifest(manifest)?;
    let product = &manifest.product;

    let upgrade_code = parse_guid("upgrade_code", &product.upgrade_code)?;
    let product_code = identity::product_code(
        &product.product_code,
        &upgrade_code,
        &resolver.version(),
        resolution.platform,
    )?;

    let directories = DirectoryTree::build(resolution.program_files, &manifest.directories)?;
    debug!("Directory tree has {} nodes", directories.len());

    let graph = ComponentGraph::build(
        &manifest,
        &directories,
        GraphContext {
            upgrade_code: &upgrade_code,
            win64: resolution.win64,
        },
    )?;
    debug!(
        "Graph has {} components and {} features",
        graph.components().len(),
        graph.features().len()
    );

    let mut scope = GuardScope::with_builtins();
    scope
        .variables
        .extend(directories.iter().map(|(_, node)| node.id.clone()));
    scope.variables.extend(product.properties.keys().cloned());
    scope
        .features
        .extend(graph.features().ids().map(str::to_string));
    scope
        .components
        .extend(graph.components().iter().map(|c| c.id.clone()));

    let schedule = sequencer::schedule(
        &manifest.custom_actions,
        &manifest.sequence,
        graph.file_keys(),
        &scope,
    )?;

    let package = ResolvedPackage {
        format_version: FORMAT_VERSION,
        product: ResolvedProduct {
            name: product.name.clone(),
            manufacturer: product.manufacturer.clone(),
            upgrade_code: format_guid(&upgrade_code),
            product_code: format_guid(&product_code),
            version: resolver.version().to_string(),
            platform: resolution.platform,
            win64: resolution.win64,
            program_files: resolution.program_files.to_string(),
            language: product.language,
            codepage: product.codepage,
            scope: product.scope,
            install_level: product.install_level,
            upgrade: product.upgrade.clone(),
            properties: product.properties.clone(),
            assets: resolver.injected_assets(),
        },
        variables: resolver.variables().to_vec(),
        directories: directories.to_resolved(),
        components: graph.components().to_vec(),
        features: graph.features().to_resolved(),
        default_features: graph.features().default_features(),
        default_components: graph.features().default_components(),
        custom_actions: schedule.actions,
        sequence: schedule.steps,
    };

    info!(
        "Resolved {} {} ({} components, {} custom actions)",
        package.product.name,
        package.product.version,
        package.components.len(),
        package.custom_actions.len()
    );

    Ok(package)
}

/// Load, validate and compile a manifest file
pub fn compile_file<P: AsRef<Path>>(path: P, config: &BuildConfig) -> anyhow::Result<ResolvedPackage> {
    config.validate()?;
    let manifest = Manifest::load_from_file(&path)?;
    let package = compile(&manifest, config)
        .map_err(crate::error::SetupForgeError::from)
        .with_context(|| format!("Failed to compile {:?}", path.as_ref()))?;
    Ok(package)
}
