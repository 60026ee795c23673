//! Component/Feature Graph
//!
//! Validates components against the directory tree and features against
//! components, and computes the default install set.
//!
//! # Component Rules
//!
//! - Ids of components, and of payload items across all components, are unique
//! - Every component lives in a declared directory
//! - Exactly one key-path item, and only a file or registry value can be one
//! - Environment mutations state their permanence
//! - Shortcuts launch a declared file and live in a declared directory
//!
//! # Feature Rules
//!
//! - Feature ids are unique at any nesting depth
//! - Every component reference resolves; every component is referenced
//! - A feature is installed by default when `0 < level <= install_level` and
//!   its parent is installed by default

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

use crate::engine::directories::DirectoryTree;
use crate::engine::integration::{expand_integrations, IntegrationContext};
use crate::error::CompileError;
use crate::identity::{self, format_guid, StabilityPolicy};
use crate::manifest::{ComponentDecl, FeatureDecl, IntegrationDecl, Manifest, PayloadItem};
use crate::types::FeatureDisplay;

// ============================================================================
// Resolved Output Types
// ============================================================================

/// A fully validated component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedComponent {
    pub id: String,
    pub directory: String,
    /// Braced upper-case stability key
    pub guid: String,
    pub stability: StabilityPolicy,
    pub win64: bool,
    /// Id of the key-path item
    pub key_path: String,
    /// `kind|directory|target` identity of the key-path item
    pub key_path_identity: String,
    /// Declared items followed by items generated from integrations
    pub items: Vec<PayloadItem>,
}

/// A feature in the resolved output, listed depth first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedFeature {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub level: u16,
    pub allow_absent: bool,
    pub display: FeatureDisplay,
    pub components: Vec<String>,
    /// Installed without user interaction
    pub default: bool,
}

// ============================================================================
// Feature Tree
// ============================================================================

/// Stable index of a node in the feature arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureId(usize);

#[derive(Debug, Clone)]
pub struct FeatureNode {
    pub decl: FeatureDecl,
    pub parent: Option<FeatureId>,
    pub children: Vec<FeatureId>,
    pub default: bool,
}

/// Features flattened into an arena, depth first in declaration order
#[derive(Debug, Clone, Default)]
pub struct FeatureTree {
    nodes: Vec<FeatureNode>,
    index: HashMap<String, FeatureId>,
}

impl FeatureTree {
    /// Flatten the declared feature forest.
    ///
    /// Component references are checked against `components`.
    pub fn build(
        features: &[FeatureDecl],
        components: &HashSet<&str>,
        install_level: u16,
    ) -> Result<Self, CompileError> {
        let mut tree = Self::default();
        for feature in features {
            tree.insert(feature, None, components, install_level)?;
        }
        Ok(tree)
    }

    fn insert(
        &mut self,
        feature: &FeatureDecl,
        parent: Option<FeatureId>,
        components: &HashSet<&str>,
        install_level: u16,
    ) -> Result<FeatureId, CompileError> {
        if self.index.contains_key(&feature.id) {
            return Err(CompileError::DuplicateFeatureId {
                id: feature.id.clone(),
            });
        }
        if let Some(missing) = feature
            .components
            .iter()
            .find(|c| !components.contains(c.as_str()))
        {
            return Err(CompileError::UnresolvedComponentRef {
                feature: feature.id.clone(),
                component: missing.clone(),
            });
        }

        let parent_default = parent.map(|p| self.nodes[p.0].default).unwrap_or(true);
        let default = parent_default && feature.level > 0 && feature.level <= install_level;

        let id = FeatureId(self.nodes.len());
        self.index.insert(feature.id.clone(), id);
        self.nodes.push(FeatureNode {
            decl: FeatureDecl {
                children: Vec::new(),
                ..feature.clone()
            },
            parent,
            children: Vec::new(),
            default,
        });

        for child in &feature.children {
            let child_id = self.insert(child, Some(id), components, install_level)?;
            self.nodes[id.0].children.push(child_id);
        }

        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<FeatureId> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: FeatureId) -> &FeatureNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every feature id, depth first
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.decl.id.as_str())
    }

    /// Every component referenced by any feature
    pub fn referenced_components(&self) -> HashSet<&str> {
        self.nodes
            .iter()
            .flat_map(|n| n.decl.components.iter().map(String::as_str))
            .collect()
    }

    pub fn default_features(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.default)
            .map(|n| n.decl.id.clone())
            .collect()
    }

    /// Components pulled in by the default features, first reference wins
    pub fn default_components(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .filter(|n| n.default)
            .flat_map(|n| n.decl.components.iter())
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect()
    }

    pub fn to_resolved(&self) -> Vec<ResolvedFeature> {
        self.nodes
            .iter()
            .map(|n| ResolvedFeature {
                id: n.decl.id.clone(),
                title: n.decl.title.clone(),
                description: n.decl.description.clone(),
                parent: n.parent.map(|p| self.nodes[p.0].decl.id.clone()),
                level: n.decl.level,
                allow_absent: n.decl.allow_absent,
                display: n.decl.display,
                components: n.decl.components.clone(),
                default: n.default,
            })
            .collect()
    }
}

// ============================================================================
// Component Graph
// ============================================================================

/// Product-level inputs to graph construction
#[derive(Debug, Clone, Copy)]
pub struct GraphContext<'a> {
    pub upgrade_code: &'a Uuid,
    /// Resolved platform bitness, used unless a component overrides it
    pub win64: bool,
}

/// Validated components and features of one manifest
#[derive(Debug, Clone)]
pub struct ComponentGraph {
    components: Vec<ResolvedComponent>,
    features: FeatureTree,
    file_keys: BTreeSet<String>,
}

impl ComponentGraph {
    /// Build and validate the graph from an expanded manifest.
    pub fn build(
        manifest: &Manifest,
        directories: &DirectoryTree,
        ctx: GraphContext<'_>,
    ) -> Result<Self, CompileError> {
        let file_keys: BTreeSet<String> =
            manifest.file_keys().into_iter().map(str::to_string).collect();
        let integration_ctx = IntegrationContext {
            scope: manifest.product.scope,
            manufacturer: &manifest.product.manufacturer,
            product: &manifest.product.name,
            file_keys: &file_keys,
        };

        let mut component_ids = HashSet::new();
        let mut item_ids = HashSet::new();
        let mut components = Vec::with_capacity(manifest.components.len());

        for decl in &manifest.components {
            if !component_ids.insert(decl.id.as_str()) {
                return Err(CompileError::DuplicateComponentId {
                    id: decl.id.clone(),
                });
            }
            let component = resolve_component(decl, directories, &integration_ctx, &ctx)?;
            for item in &component.items {
                if !item_ids.insert(item.id().to_string()) {
                    return Err(CompileError::DuplicateItemId {
                        id: item.id().to_string(),
                    });
                }
            }
            debug!(
                "Component {} -> {} ({} items, key path {})",
                component.id,
                component.guid,
                component.items.len(),
                component.key_path
            );
            components.push(component);
        }

        let features = FeatureTree::build(
            &manifest.features,
            &component_ids,
            manifest.product.install_level,
        )?;

        let referenced = features.referenced_components();
        if let Some(orphan) = components
            .iter()
            .find(|c| !referenced.contains(c.id.as_str()))
        {
            return Err(CompileError::OrphanComponent {
                component: orphan.id.clone(),
            });
        }

        check_directory_usage(manifest, directories, &components)?;

        Ok(Self {
            components,
            features,
            file_keys,
        })
    }

    pub fn components(&self) -> &[ResolvedComponent] {
        &self.components
    }

    pub fn features(&self) -> &FeatureTree {
        &self.features
    }

    pub fn file_keys(&self) -> &BTreeSet<String> {
        &self.file_keys
    }
}

fn resolve_component(
    decl: &ComponentDecl,
    directories: &DirectoryTree,
    integration_ctx: &IntegrationContext<'_>,
    ctx: &GraphContext<'_>,
) -> Result<ResolvedComponent, CompileError> {
    let require_dir = |owner: &str, directory: &str| {
        if directories.contains(directory) {
            Ok(())
        } else {
            Err(CompileError::DanglingDirectoryRef {
                owner: owner.to_string(),
                directory: directory.to_string(),
            })
        }
    };
    let require_file = |owner: &str, file_key: &str| {
        if integration_ctx.file_keys.contains(file_key) {
            Ok(())
        } else {
            Err(CompileError::UnresolvedFileKey {
                owner: owner.to_string(),
                file_key: file_key.to_string(),
            })
        }
    };

    require_dir(&decl.id, &decl.directory)?;
    for integration in &decl.integrations {
        if let IntegrationDecl::Path { directory, .. } = integration {
            require_dir(&decl.id, directory)?;
        }
    }

    let items = expand_integrations(decl, integration_ctx)?;

    for item in &items {
        match item {
            PayloadItem::Environment { id, permanent, .. } if permanent.is_none() => {
                return Err(CompileError::MissingPermanenceFlag {
                    component: decl.id.clone(),
                    item: id.clone(),
                });
            }
            PayloadItem::Shortcut {
                id,
                target,
                directory,
                working_directory,
                icon,
                ..
            } => {
                require_file(id, target)?;
                if let Some(icon) = icon {
                    require_file(id, icon)?;
                }
                require_dir(id, directory)?;
                if let Some(wd) = working_directory {
                    require_dir(id, wd)?;
                }
            }
            PayloadItem::RemoveFolder { id, directory, .. } => require_dir(id, directory)?,
            _ => {}
        }
    }

    if let Some(item) = items
        .iter()
        .find(|item| item.is_key_path() && !item.can_be_key_path())
    {
        return Err(CompileError::KeyPathNotAllowed {
            component: decl.id.clone(),
            item: item.id().to_string(),
        });
    }

    let key_paths: Vec<&PayloadItem> = items.iter().filter(|i| i.is_key_path()).collect();
    let key_item = match key_paths.as_slice() {
        [] => {
            return Err(CompileError::MissingKeyPath {
                component: decl.id.clone(),
            });
        }
        [single] => *single,
        many => {
            return Err(CompileError::MultipleKeyPaths {
                component: decl.id.clone(),
                items: many.iter().map(|i| i.id().to_string()).collect(),
            });
        }
    };

    let install_path = directories.path_of(&decl.directory).unwrap_or_default();
    let key_path_identity = identity::key_path_identity(&install_path, key_item).ok_or_else(|| {
        CompileError::KeyPathNotAllowed {
            component: decl.id.clone(),
            item: key_item.id().to_string(),
        }
    })?;
    let (guid, stability) =
        identity::stability_key(&decl.id, &decl.guid, ctx.upgrade_code, &key_path_identity)?;

    Ok(ResolvedComponent {
        id: decl.id.clone(),
        directory: decl.directory.clone(),
        guid: format_guid(&guid),
        stability,
        win64: decl.win64.unwrap_or(ctx.win64),
        key_path: key_item.id().to_string(),
        key_path_identity,
        items,
    })
}

/// Every declared directory must hold something, lead to something that
/// does, or be marked as grouping
fn check_directory_usage(
    manifest: &Manifest,
    directories: &DirectoryTree,
    components: &[ResolvedComponent],
) -> Result<(), CompileError> {
    let mut direct: Vec<&str> = Vec::new();
    for component in components {
        direct.push(&component.directory);
        for item in &component.items {
            match item {
                PayloadItem::Shortcut { directory, .. }
                | PayloadItem::RemoveFolder { directory, .. } => direct.push(directory),
                _ => {}
            }
        }
    }

    let mut used = HashSet::new();
    for id in direct {
        if let Some(dir) = directories.get(id) {
            used.insert(dir);
            used.extend(directories.ancestors(dir));
        }
    }

    for decl in &manifest.directories {
        let Some(dir) = directories.get(&decl.id) else {
            continue;
        };
        if !decl.grouping && !used.contains(&dir) {
            return Err(CompileError::UnusedDirectory {
                id: decl.id.clone(),
            });
        }
    }

    Ok(())
}
