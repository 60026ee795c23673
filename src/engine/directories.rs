//! Directory Tree Builder
//!
//! Assembles the install-location namespace as an arena of nodes addressed by
//! [`DirId`]. The tree is seeded with `TARGETDIR` and the well-known standard
//! folders (only the program-files folder of the resolved bitness), then
//! declared directories are linked under their parents.
//!
//! Identifiers share one namespace with the standard folders, so declaring
//! `ProgramMenuFolder` again is a duplicate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CompileError;
use crate::manifest::DirectoryDecl;
use crate::types::StandardFolder;

/// Stable index of a node in the directory arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirId(usize);

/// One install location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryNode {
    pub id: String,
    pub name: String,
    pub parent: Option<DirId>,
    pub children: Vec<DirId>,
    /// Seeded well-known folder rather than a declared one
    pub standard: bool,
    pub grouping: bool,
}

/// Serializable form of a directory in the resolved output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDirectory {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub standard: bool,
    /// Display path from the root, e.g. `[ProgramFiles64Folder]\Acme`
    pub path: String,
}

/// The rooted install-location tree
#[derive(Debug, Clone)]
pub struct DirectoryTree {
    nodes: Vec<DirectoryNode>,
    index: HashMap<String, DirId>,
}

impl DirectoryTree {
    /// Standard folders seeded under `TARGETDIR` for a given program-files base
    pub fn standard_folders(base: StandardFolder) -> [StandardFolder; 5] {
        [
            base,
            StandardFolder::ProgramMenuFolder,
            StandardFolder::DesktopFolder,
            StandardFolder::LocalAppDataFolder,
            StandardFolder::CommonAppDataFolder,
        ]
    }

    /// Build the tree from the resolved base folder and declared directories.
    ///
    /// # Errors
    ///
    /// - [`CompileError::DuplicateDirectoryId`] when an id is declared twice
    ///   or shadows a standard folder
    /// - [`CompileError::DanglingParentReference`] when a parent is not
    ///   declared, or a chain of parents never reaches `TARGETDIR`
    pub fn build(base: StandardFolder, decls: &[DirectoryDecl]) -> Result<Self, CompileError> {
        let mut tree = Self {
            nodes: Vec::with_capacity(decls.len() + 6),
            index: HashMap::new(),
        };

        let root = tree.insert(
            StandardFolder::TargetDir.to_string(),
            "SourceDir".to_string(),
            true,
            false,
        );
        for folder in Self::standard_folders(base) {
            let id = tree.insert(folder.to_string(), folder.to_string(), true, false);
            tree.link(id, root);
        }

        // First pass: register every id so parents may be declared later
        let mut declared = Vec::with_capacity(decls.len());
        for decl in decls {
            if tree.index.contains_key(&decl.id) {
                return Err(CompileError::DuplicateDirectoryId {
                    id: decl.id.clone(),
                });
            }
            let id = tree.insert(decl.id.clone(), decl.name.clone(), false, decl.grouping);
            declared.push((id, decl));
        }

        // Second pass: link parents
        for (id, decl) in declared {
            let parent = match decl.parent.as_deref() {
                None => root,
                Some(parent) => tree.get(parent).ok_or_else(|| {
                    CompileError::DanglingParentReference {
                        directory: decl.id.clone(),
                        parent: parent.to_string(),
                    }
                })?,
            };
            tree.link(id, parent);
        }

        tree.check_rooted()?;
        Ok(tree)
    }

    fn insert(&mut self, id: String, name: String, standard: bool, grouping: bool) -> DirId {
        let dir = DirId(self.nodes.len());
        self.index.insert(id.clone(), dir);
        self.nodes.push(DirectoryNode {
            id,
            name,
            parent: None,
            children: Vec::new(),
            standard,
            grouping,
        });
        dir
    }

    fn link(&mut self, child: DirId, parent: DirId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Every node must reach the root; parent cycles never do
    fn check_rooted(&self) -> Result<(), CompileError> {
        for (i, node) in self.nodes.iter().enumerate().skip(1) {
            let mut current = node.parent;
            let mut steps = 0;
            while let Some(dir) = current {
                if dir == self.root() {
                    break;
                }
                steps += 1;
                if steps > self.nodes.len() {
                    current = None;
                    break;
                }
                current = self.nodes[dir.0].parent;
            }
            if current.is_none() {
                let parent = node
                    .parent
                    .map(|p| self.nodes[p.0].id.clone())
                    .unwrap_or_default();
                return Err(CompileError::DanglingParentReference {
                    directory: self.nodes[i].id.clone(),
                    parent,
                });
            }
        }
        Ok(())
    }

    pub fn root(&self) -> DirId {
        DirId(0)
    }

    pub fn get(&self, id: &str) -> Option<DirId> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, dir: DirId) -> &DirectoryNode {
        &self.nodes[dir.0]
    }

    /// Number of nodes, including the root and standard folders
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in insertion order: root, standard folders, then declarations
    pub fn iter(&self) -> impl Iterator<Item = (DirId, &DirectoryNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (DirId(i), n))
    }

    /// Strict ancestors of `dir`, nearest first, ending at the root
    pub fn ancestors(&self, dir: DirId) -> Vec<DirId> {
        let mut out = Vec::new();
        let mut current = self.nodes[dir.0].parent;
        while let Some(parent) = current {
            out.push(parent);
            current = self.nodes[parent.0].parent;
        }
        out
    }

    /// Display path of a directory from the root
    pub fn path_of(&self, id: &str) -> Option<String> {
        let dir = self.get(id)?;
        let mut segments: Vec<String> = Vec::new();
        let mut current = Some(dir);
        while let Some(d) = current {
            let node = &self.nodes[d.0];
            if d == self.root() {
                break;
            }
            if node.standard {
                segments.push(format!("[{}]", node.id));
                break;
            }
            segments.push(node.name.clone());
            current = node.parent;
        }
        segments.reverse();
        Some(segments.join("\\"))
    }

    /// Serializable listing of every node except the implicit root
    pub fn to_resolved(&self) -> Vec<ResolvedDirectory> {
        self.iter()
            .skip(1)
            .map(|(_, node)| ResolvedDirectory {
                id: node.id.clone(),
                name: node.name.clone(),
                parent: node.parent.map(|p| self.nodes[p.0].id.clone()),
                standard: node.standard,
                path: self.path_of(&node.id).unwrap_or_default(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(id: &str, name: &str, parent: Option<&str>) -> DirectoryDecl {
        DirectoryDecl {
            id: id.to_string(),
            name: name.to_string(),
            parent: parent.map(str::to_string),
            grouping: false,
        }
    }

    #[test]
    fn test_tree_is_seeded_with_resolved_program_files() {
        let tree = DirectoryTree::build(StandardFolder::ProgramFiles64Folder, &[]).unwrap();

        assert!(tree.contains("TARGETDIR"));
        assert!(tree.contains("ProgramFiles64Folder"));
        assert!(!tree.contains("ProgramFilesFolder"));
        assert!(tree.contains("ProgramMenuFolder"));
        assert_eq!(tree.node(tree.root()).parent, None);
    }

    #[test]
    fn test_nested_directories_and_paths() {
        let decls = vec![
            dir("INSTALLFOLDER", "Acme Editor", Some("ManufacturerFolder")),
            dir("ManufacturerFolder", "Acme", Some("ProgramFilesFolder")),
            dir("PluginsFolder", "plugins", Some("INSTALLFOLDER")),
        ];
        let tree = DirectoryTree::build(StandardFolder::ProgramFilesFolder, &decls).unwrap();

        assert_eq!(
            tree.path_of("PluginsFolder").unwrap(),
            "[ProgramFilesFolder]\\Acme\\Acme Editor\\plugins"
        );

        let plugins = tree.get("PluginsFolder").unwrap();
        let ancestors: Vec<&str> = tree
            .ancestors(plugins)
            .into_iter()
            .map(|d| tree.node(d).id.as_str())
            .collect();
        assert_eq!(
            ancestors,
            vec!["INSTALLFOLDER", "ManufacturerFolder", "ProgramFilesFolder", "TARGETDIR"]
        );
    }

    #[test]
    fn test_missing_parent_attaches_to_root() {
        let tree = DirectoryTree::build(
            StandardFolder::ProgramFilesFolder,
            &[dir("DataDir", "Data", None)],
        )
        .unwrap();
        let data = tree.get("DataDir").unwrap();
        assert_eq!(tree.node(data).parent, Some(tree.root()));
        assert_eq!(tree.path_of("DataDir").unwrap(), "Data");
    }

    #[test]
    fn test_duplicate_directory_id() {
        let decls = vec![
            dir("INSTALLFOLDER", "A", Some("ProgramFilesFolder")),
            dir("INSTALLFOLDER", "B", Some("ProgramFilesFolder")),
        ];
        let err = DirectoryTree::build(StandardFolder::ProgramFilesFolder, &decls).unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateDirectoryId {
                id: "INSTALLFOLDER".to_string()
            }
        );
    }

    #[test]
    fn test_standard_folder_cannot_be_redeclared() {
        let decls = vec![dir("ProgramMenuFolder", "Start", None)];
        assert!(matches!(
            DirectoryTree::build(StandardFolder::ProgramFilesFolder, &decls),
            Err(CompileError::DuplicateDirectoryId { .. })
        ));
    }

    #[test]
    fn test_dangling_parent() {
        let decls = vec![dir("INSTALLFOLDER", "Acme", Some("Nowhere"))];
        let err = DirectoryTree::build(StandardFolder::ProgramFilesFolder, &decls).unwrap_err();
        assert_eq!(
            err,
            CompileError::DanglingParentReference {
                directory: "INSTALLFOLDER".to_string(),
                parent: "Nowhere".to_string()
            }
        );
    }

    #[test]
    fn test_other_bitness_program_files_is_dangling() {
        let decls = vec![dir("INSTALLFOLDER", "Acme", Some("ProgramFiles64Folder"))];
        assert!(matches!(
            DirectoryTree::build(StandardFolder::ProgramFilesFolder, &decls),
            Err(CompileError::DanglingParentReference { .. })
        ));
    }

    #[test]
    fn test_parent_cycle_is_rejected() {
        let decls = vec![dir("A", "a", Some("B")), dir("B", "b", Some("A"))];
        assert!(matches!(
            DirectoryTree::build(StandardFolder::ProgramFilesFolder, &decls),
            Err(CompileError::DanglingParentReference { .. })
        ));
    }

    #[test]
    fn test_to_resolved_skips_root() {
        let tree = DirectoryTree::build(
            StandardFolder::ProgramFilesFolder,
            &[dir("INSTALLFOLDER", "Acme", Some("ProgramFilesFolder"))],
        )
        .unwrap();
        let resolved = tree.to_resolved();
        assert!(resolved.iter().all(|d| d.id != "TARGETDIR"));
        let install = resolved.iter().find(|d| d.id == "INSTALLFOLDER").unwrap();
        assert_eq!(install.parent.as_deref(), Some("ProgramFilesFolder"));
        assert_eq!(install.path, "[ProgramFilesFolder]\\Acme");
        assert!(!install.standard);
    }
}
