//! Shell/Registry Integration Writer
//!
//! Translates high-level integration intents into the concrete payload items
//! of the owning component. Nothing is written to a registry here; the output
//! is purely declarative and the installer engine applies it at run time.
//!
//! | Intent                | Produces |
//! |-----------------------|----------|
//! | `path`                | `environment` item for `PATH` |
//! | `file_association`    | `registry` items under `Software\Classes` |
//! | `start_menu_shortcut` | `shortcut` + `remove_folder` (+ HKCU key-path value) |

use std::collections::BTreeSet;

use crate::error::CompileError;
use crate::manifest::{ComponentDecl, IntegrationDecl, PayloadItem};
use crate::types::{EnvAction, InstallScope, RegistryRoot, RegistryValueType, StandardFolder};

/// Product-level facts the writer needs
#[derive(Debug, Clone, Copy)]
pub struct IntegrationContext<'a> {
    pub scope: InstallScope,
    pub manufacturer: &'a str,
    pub product: &'a str,
    /// Every file key declared in the manifest
    pub file_keys: &'a BTreeSet<String>,
}

impl IntegrationContext<'_> {
    fn classes_root(&self) -> RegistryRoot {
        match self.scope {
            InstallScope::PerMachine => RegistryRoot::Hklm,
            InstallScope::PerUser => RegistryRoot::Hkcu,
        }
    }

    fn require_file(&self, owner: &str, file_key: &str) -> Result<(), CompileError> {
        if self.file_keys.contains(file_key) {
            Ok(())
        } else {
            Err(CompileError::UnresolvedFileKey {
                owner: owner.to_string(),
                file_key: file_key.to_string(),
            })
        }
    }
}

/// Expand the component's integrations and return its full item list.
///
/// Declared items come first, generated items follow in intent order.
///
/// # Errors
///
/// - [`CompileError::MissingPermanenceFlag`] for a `path` intent without
///   `permanent`
/// - [`CompileError::UnresolvedFileKey`] when an association names an
///   undeclared file
pub fn expand_integrations(
    component: &ComponentDecl,
    ctx: &IntegrationContext<'_>,
) -> Result<Vec<PayloadItem>, CompileError> {
    let mut items = component.items.clone();

    for (n, intent) in component.integrations.iter().enumerate() {
        match intent {
            IntegrationDecl::Path {
                directory,
                part,
                permanent,
                system,
            } => {
                let id = format!("{}_Path{}", component.id, n);
                let permanent = permanent.ok_or_else(|| CompileError::MissingPermanenceFlag {
                    component: component.id.clone(),
                    item: id.clone(),
                })?;
                items.push(PayloadItem::Environment {
                    id,
                    name: "PATH".to_string(),
                    value: format!("[{}]", directory),
                    part: *part,
                    action: EnvAction::Set,
                    permanent: Some(permanent),
                    system: *system,
                    key_path: false,
                });
            }

            IntegrationDecl::FileAssociation {
                extension,
                prog_id,
                target,
                description,
                icon,
                verb,
                command,
            } => {
                let owner = format!("{}/{}", component.id, prog_id);
                ctx.require_file(&owner, target)?;
                let icon = icon.as_deref().unwrap_or(target);
                ctx.require_file(&owner, icon)?;

                let root = ctx.classes_root();
                let ext = extension.trim_start_matches('.');
                let classes = "Software\\Classes";
                let base = format!("{}_Assoc_{}", component.id, sanitize(ext));
                let command = command
                    .clone()
                    .unwrap_or_else(|| format!("\"[#{}]\" \"%1\"", target));
                let description = description
                    .clone()
                    .unwrap_or_else(|| format!("{} file", ext.to_uppercase()));

                let value = |suffix: &str, key: String, value: String| PayloadItem::Registry {
                    id: format!("{}_{}", base, suffix),
                    root,
                    key,
                    name: None,
                    value,
                    value_type: RegistryValueType::String,
                    key_path: false,
                };

                items.push(value(
                    "Ext",
                    format!("{}\\.{}", classes, ext),
                    prog_id.clone(),
                ));
                items.push(value(
                    "ProgId",
                    format!("{}\\{}", classes, prog_id),
                    description,
                ));
                items.push(value(
                    "Icon",
                    format!("{}\\{}\\DefaultIcon", classes, prog_id),
                    format!("[#{}],0", icon),
                ));
                items.push(value(
                    "Command",
                    format!("{}\\{}\\shell\\{}\\command", classes, prog_id, verb),
                    command,
                ));
            }

            IntegrationDecl::StartMenuShortcut {
                id,
                name,
                target,
                folder,
                icon,
                working_directory,
                description,
                registry_key_path,
            } => {
                let folder = folder
                    .clone()
                    .unwrap_or_else(|| StandardFolder::ProgramMenuFolder.to_string());

                items.push(PayloadItem::Shortcut {
                    id: id.clone(),
                    name: name.clone(),
                    target: target.clone(),
                    directory: folder.clone(),
                    working_directory: working_directory
                        .clone()
                        .or_else(|| Some(component.directory.clone())),
                    icon: icon.clone(),
                    description: description.clone(),
                    arguments: None,
                    key_path: false,
                });

                let remove_id = format!("{}_Remove{}", component.id, sanitize(&folder));
                let already_removed = items.iter().any(|item| item.id() == remove_id);
                if !already_removed && folder != StandardFolder::ProgramMenuFolder.to_string() {
                    items.push(PayloadItem::RemoveFolder {
                        id: remove_id,
                        directory: folder,
                        key_path: false,
                    });
                }

                if *registry_key_path {
                    items.push(PayloadItem::Registry {
                        id: format!("{}_Installed", id),
                        root: RegistryRoot::Hkcu,
                        key: format!("Software\\{}\\{}", ctx.manufacturer, ctx.product),
                        name: Some(format!("{}_installed", id)),
                        value: "1".to_string(),
                        value_type: RegistryValueType::Integer,
                        key_path: true,
                    });
                }
            }
        }
    }

    Ok(items)
}

/// Keep identifier-safe characters only
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
