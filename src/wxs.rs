//! WiX Source Emitter
//!
//! Renders a [`ResolvedPackage`] as WiX v3 source for the external build
//! engine. Nothing is validated here; the package is already consistent, so
//! rendering is a straight walk over the resolved structure.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::{BTreeMap, HashMap};

use crate::compiler::ResolvedPackage;
use crate::engine::directories::ResolvedDirectory;
use crate::engine::graph::{ResolvedComponent, ResolvedFeature};
use crate::engine::sequencer::StepKind;
use crate::error::Result;
use crate::manifest::PayloadItem;
use crate::types::{
    EnvAction, ExecuteMode, InstallScope, RegistryValueType, ReturnPolicy, StandardFolder,
};

const WIX_NAMESPACE: &str = "http://schemas.microsoft.com/wix/2006/wi";

type Attrs<'a> = [(&'a str, String)];

/// Thin wrapper over the quick-xml writer with attribute-list helpers
struct WxsWriter {
    writer: Writer<Vec<u8>>,
}

impl WxsWriter {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn element<'a>(name: &'a str, attrs: &'a Attrs<'a>) -> BytesStart<'a> {
        let mut start = BytesStart::new(name);
        for (key, value) in attrs {
            start.push_attribute((*key, value.as_str()));
        }
        start
    }

    fn start(&mut self, name: &str, attrs: &Attrs<'_>) -> Result<()> {
        self.writer
            .write_event(Event::Start(Self::element(name, attrs)))?;
        Ok(())
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn empty(&mut self, name: &str, attrs: &Attrs<'_>) -> Result<()> {
        self.writer
            .write_event(Event::Empty(Self::element(name, attrs)))?;
        Ok(())
    }

    fn text_element(&mut self, name: &str, attrs: &Attrs<'_>, text: &str) -> Result<()> {
        self.start(name, attrs)?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    fn finish(self) -> String {
        let mut out = String::from_utf8_lossy(&self.writer.into_inner()).into_owned();
        out.push('\n');
        out
    }
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "no" }.to_string()
}

fn install_scope(scope: InstallScope) -> &'static str {
    match scope {
        InstallScope::PerMachine => "perMachine",
        InstallScope::PerUser => "perUser",
    }
}

fn return_policy(policy: ReturnPolicy) -> &'static str {
    match policy {
        ReturnPolicy::Check => "check",
        ReturnPolicy::Ignore => "ignore",
        ReturnPolicy::AsyncWait => "asyncWait",
        ReturnPolicy::AsyncNoWait => "asyncNoWait",
    }
}

fn registry_type(value_type: RegistryValueType) -> &'static str {
    match value_type {
        RegistryValueType::String => "string",
        RegistryValueType::Integer => "integer",
        RegistryValueType::Expandable => "expandable",
        RegistryValueType::Multistring => "multiString",
    }
}

fn icon_id(file_key: &str) -> String {
    format!("Icon_{}", file_key)
}

/// Render the package as a complete `.wxs` document
pub fn render(package: &ResolvedPackage) -> Result<String> {
    let product = &package.product;
    let mut w = WxsWriter::new();

    w.writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    w.start("Wix", &[("xmlns", WIX_NAMESPACE.to_string())])?;
    w.start(
        "Product",
        &[
            ("Id", product.product_code.clone()),
            ("Name", product.name.clone()),
            ("Language", product.language.to_string()),
            ("Codepage", product.codepage.to_string()),
            ("Version", product.version.clone()),
            ("Manufacturer", product.manufacturer.clone()),
            ("UpgradeCode", product.upgrade_code.clone()),
        ],
    )?;

    w.empty(
        "Package",
        &[
            ("InstallerVersion", "500".to_string()),
            ("Compressed", "yes".to_string()),
            ("InstallScope", install_scope(product.scope).to_string()),
            ("Platform", product.platform.to_string()),
        ],
    )?;
    w.empty(
        "MajorUpgrade",
        &[
            ("AllowDowngrades", yes_no(product.upgrade.allow_downgrades)),
            (
                "AllowSameVersionUpgrades",
                yes_no(product.upgrade.allow_same_version_upgrades),
            ),
            (
                "DowngradeErrorMessage",
                product.upgrade.downgrade_error_message.clone(),
            ),
        ],
    )?;
    w.empty("MediaTemplate", &[("EmbedCab", "yes".to_string())])?;

    w.empty(
        "Property",
        &[
            ("Id", "INSTALLLEVEL".to_string()),
            ("Value", product.install_level.to_string()),
        ],
    )?;
    for (id, value) in &product.properties {
        w.empty("Property", &[("Id", id.clone()), ("Value", value.clone())])?;
    }

    render_assets(&mut w, package)?;
    render_directories(&mut w, &package.directories)?;

    for component in &package.components {
        w.start("DirectoryRef", &[("Id", component.directory.clone())])?;
        render_component(&mut w, component)?;
        w.end("DirectoryRef")?;
    }

    render_features(&mut w, &package.features)?;

    for action in &package.custom_actions {
        let execute = match action.execute {
            ExecuteMode::Immediate => "immediate",
            ExecuteMode::Deferred => "deferred",
            ExecuteMode::Commit => "commit",
            ExecuteMode::Rollback => "rollback",
        };
        w.empty(
            "CustomAction",
            &[
                ("Id", action.id.clone()),
                ("FileKey", action.file_key.clone()),
                ("ExeCommand", action.arguments.clone()),
                ("Execute", execute.to_string()),
                ("Impersonate", yes_no(action.impersonate)),
                ("Return", return_policy(action.return_policy).to_string()),
            ],
        )?;
    }

    if !package.custom_actions.is_empty() {
        w.start("InstallExecuteSequence", &[])?;
        let mut previous: Option<&str> = None;
        for step in &package.sequence {
            if step.kind == StepKind::Action {
                let mut attrs = vec![("Action", step.name.clone())];
                match previous {
                    Some(prev) => attrs.push(("After", prev.to_string())),
                    None => attrs.push(("Sequence", step.sequence.to_string())),
                }
                match &step.condition {
                    Some(condition) => w.text_element("Custom", &attrs, condition)?,
                    None => w.empty("Custom", &attrs)?,
                }
            }
            previous = Some(step.name.as_str());
        }
        w.end("InstallExecuteSequence")?;
    }

    w.end("Product")?;
    w.end("Wix")?;
    Ok(w.finish())
}

/// Product icon, shortcut icons and UI bitmaps
fn render_assets(w: &mut WxsWriter, package: &ResolvedPackage) -> Result<()> {
    let assets = &package.product.assets;

    if let Some(icon) = assets.get("icon") {
        w.empty(
            "Icon",
            &[("Id", "ProductIcon".to_string()), ("SourceFile", icon.clone())],
        )?;
        w.empty(
            "Property",
            &[
                ("Id", "ARPPRODUCTICON".to_string()),
                ("Value", "ProductIcon".to_string()),
            ],
        )?;
    }

    let sources: HashMap<&str, &str> = package
        .components
        .iter()
        .flat_map(|c| c.items.iter())
        .filter_map(|item| match item {
            PayloadItem::File { id, source, .. } => Some((id.as_str(), source.as_str())),
            _ => None,
        })
        .collect();
    let mut shortcut_icons: Vec<&str> = package
        .components
        .iter()
        .flat_map(|c| c.items.iter())
        .filter_map(|item| match item {
            PayloadItem::Shortcut { icon: Some(icon), .. } => Some(icon.as_str()),
            _ => None,
        })
        .collect();
    shortcut_icons.sort_unstable();
    shortcut_icons.dedup();
    for key in shortcut_icons {
        if let Some(source) = sources.get(key) {
            w.empty(
                "Icon",
                &[("Id", icon_id(key)), ("SourceFile", source.to_string())],
            )?;
        }
    }

    for (name, variable) in [
        ("license", "WixUILicenseRtf"),
        ("banner", "WixUIBannerBmp"),
        ("dialog", "WixUIDialogBmp"),
    ] {
        if let Some(value) = assets.get(name) {
            w.empty(
                "WixVariable",
                &[("Id", variable.to_string()), ("Value", value.clone())],
            )?;
        }
    }

    Ok(())
}

fn render_directories(w: &mut WxsWriter, directories: &[ResolvedDirectory]) -> Result<()> {
    let root = StandardFolder::TargetDir.to_string();
    let mut children: BTreeMap<&str, Vec<&ResolvedDirectory>> = BTreeMap::new();
    for dir in directories {
        children
            .entry(dir.parent.as_deref().unwrap_or(&root))
            .or_default()
            .push(dir);
    }

    fn walk(
        w: &mut WxsWriter,
        dir: &ResolvedDirectory,
        children: &BTreeMap<&str, Vec<&ResolvedDirectory>>,
    ) -> Result<()> {
        let mut attrs = vec![("Id", dir.id.clone())];
        if !dir.standard {
            attrs.push(("Name", dir.name.clone()));
        }
        match children.get(dir.id.as_str()) {
            Some(kids) => {
                w.start("Directory", &attrs)?;
                for kid in kids {
                    walk(w, kid, children)?;
                }
                w.end("Directory")
            }
            None => w.empty("Directory", &attrs),
        }
    }

    w.start(
        "Directory",
        &[("Id", root.clone()), ("Name", "SourceDir".to_string())],
    )?;
    for dir in children.get(root.as_str()).into_iter().flatten() {
        walk(w, dir, &children)?;
    }
    w.end("Directory")
}

fn render_component(w: &mut WxsWriter, component: &ResolvedComponent) -> Result<()> {
    w.start(
        "Component",
        &[
            ("Id", component.id.clone()),
            ("Guid", component.guid.clone()),
            ("Win64", yes_no(component.win64)),
        ],
    )?;

    for item in &component.items {
        match item {
            PayloadItem::File {
                id,
                source,
                name,
                key_path,
            } => {
                let mut attrs = vec![("Id", id.clone()), ("Source", source.clone())];
                if let Some(name) = name {
                    attrs.push(("Name", name.clone()));
                }
                attrs.push(("KeyPath", yes_no(*key_path)));
                w.empty("File", &attrs)?;
            }
            PayloadItem::Registry {
                id,
                root,
                key,
                name,
                value,
                value_type,
                key_path,
            } => {
                let mut attrs = vec![
                    ("Id", id.clone()),
                    ("Root", root.to_string()),
                    ("Key", key.clone()),
                ];
                if let Some(name) = name {
                    attrs.push(("Name", name.clone()));
                }
                attrs.push(("Type", registry_type(*value_type).to_string()));
                attrs.push(("Value", value.clone()));
                attrs.push(("KeyPath", yes_no(*key_path)));
                w.empty("RegistryValue", &attrs)?;
            }
            PayloadItem::Environment {
                id,
                name,
                value,
                part,
                action,
                permanent,
                system,
                ..
            } => {
                let action = match action {
                    EnvAction::Set => "set",
                    EnvAction::Create => "create",
                    EnvAction::Remove => "remove",
                };
                w.empty(
                    "Environment",
                    &[
                        ("Id", id.clone()),
                        ("Name", name.clone()),
                        ("Value", value.clone()),
                        ("Part", part.to_string()),
                        ("Action", action.to_string()),
                        ("Permanent", yes_no(permanent.unwrap_or(false))),
                        ("System", yes_no(*system)),
                    ],
                )?;
            }
            PayloadItem::Shortcut {
                id,
                name,
                target,
                directory,
                working_directory,
                icon,
                description,
                arguments,
                ..
            } => {
                let mut attrs = vec![
                    ("Id", id.clone()),
                    ("Name", name.clone()),
                    ("Target", format!("[#{}]", target)),
                    ("Directory", directory.clone()),
                ];
                if let Some(wd) = working_directory {
                    attrs.push(("WorkingDirectory", wd.clone()));
                }
                if let Some(icon) = icon {
                    attrs.push(("Icon", icon_id(icon)));
                }
                if let Some(description) = description {
                    attrs.push(("Description", description.clone()));
                }
                if let Some(arguments) = arguments {
                    attrs.push(("Arguments", arguments.clone()));
                }
                w.empty("Shortcut", &attrs)?;
            }
            PayloadItem::RemoveFolder { id, directory, .. } => {
                w.empty(
                    "RemoveFolder",
                    &[
                        ("Id", id.clone()),
                        ("Directory", directory.clone()),
                        ("On", "uninstall".to_string()),
                    ],
                )?;
            }
        }
    }

    w.end("Component")
}

fn render_features(w: &mut WxsWriter, features: &[ResolvedFeature]) -> Result<()> {
    let mut children: HashMap<Option<&str>, Vec<&ResolvedFeature>> = HashMap::new();
    for feature in features {
        children
            .entry(feature.parent.as_deref())
            .or_default()
            .push(feature);
    }

    fn walk(
        w: &mut WxsWriter,
        feature: &ResolvedFeature,
        children: &HashMap<Option<&str>, Vec<&ResolvedFeature>>,
    ) -> Result<()> {
        let mut attrs = vec![("Id", feature.id.clone()), ("Title", feature.title.clone())];
        if !feature.description.is_empty() {
            attrs.push(("Description", feature.description.clone()));
        }
        attrs.push(("Level", feature.level.to_string()));
        attrs.push(("AllowAbsent", yes_no(feature.allow_absent)));
        attrs.push(("Display", feature.display.to_string()));

        w.start("Feature", &attrs)?;
        for component in &feature.components {
            w.empty("ComponentRef", &[("Id", component.clone())])?;
        }
        for child in children.get(&Some(feature.id.as_str())).into_iter().flatten() {
            walk(w, child, children)?;
        }
        w.end("Feature")
    }

    for feature in children.get(&None).into_iter().flatten() {
        walk(w, feature, &children)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::config::BuildConfig;
    use crate::manifest::Manifest;

    const MANIFEST: &str = r#"{
        "product": {
            "name": "Acme & Sons Editor",
            "manufacturer": "Acme Corp",
            "upgrade_code": "{3F2504E0-4F89-11D3-9A0C-0305E82C3301}"
        },
        "directories": [
            { "id": "INSTALLFOLDER", "name": "Acme Editor", "parent": "${program_files}" }
        ],
        "components": [
            {
                "id": "Main",
                "directory": "INSTALLFOLDER",
                "items": [
                    { "kind": "file", "id": "AcmeExe", "source": "${binary}", "key_path": true }
                ],
                "integrations": [
                    { "kind": "path", "directory": "INSTALLFOLDER", "permanent": false }
                ]
            }
        ],
        "features": [
            { "id": "Core", "title": "Core", "components": ["Main"],
              "children": [ { "id": "Docs", "title": "Docs", "level": 0 } ] }
        ],
        "custom_actions": [
            { "id": "LaunchApp", "file_key": "AcmeExe", "return": "async_no_wait" }
        ],
        "sequence": [
            { "action": "LaunchApp", "after": "InstallFinalize", "condition": "NOT Installed AND UILevel > 3" }
        ]
    }"#;

    fn render_sample() -> String {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        let mut config = BuildConfig::new("2.0.0")
            .with_platform("x64")
            .with_binary("dist\\acme.exe");
        config.icon = Some("assets/acme.ico".into());
        render(&compile(&manifest, &config).unwrap()).unwrap()
    }

    #[test]
    fn test_document_structure() {
        let wxs = render_sample();
        assert!(wxs.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(wxs.contains(r#"<Wix xmlns="http://schemas.microsoft.com/wix/2006/wi">"#));
        assert!(wxs.contains(r#"Platform="x64""#));
        assert!(wxs.contains(r#"<Directory Id="ProgramFiles64Folder">"#));
        assert!(wxs.contains(r#"<Directory Id="INSTALLFOLDER" Name="Acme Editor"/>"#));
        assert!(wxs.contains(r#"<Icon Id="ProductIcon" SourceFile="assets/acme.ico"/>"#));
        assert!(wxs.trim_end().ends_with("</Wix>"));
    }

    #[test]
    fn test_text_is_escaped() {
        let wxs = render_sample();
        assert!(wxs.contains("Acme &amp; Sons Editor"));
        assert!(wxs.contains("NOT Installed AND UILevel &gt; 3"));
    }

    #[test]
    fn test_components_and_features() {
        let wxs = render_sample();
        assert!(wxs.contains(r#"<File Id="AcmeExe" Source="dist\acme.exe" KeyPath="yes"/>"#));
        assert!(wxs.contains(r#"Name="PATH" Value="[INSTALLFOLDER]" Part="last" Action="set" Permanent="no""#));
        assert!(wxs.contains(r#"<ComponentRef Id="Main"/>"#));
        assert!(wxs.contains(r#"<Feature Id="Docs" Title="Docs" Level="0""#));
    }

    #[test]
    fn test_custom_action_sequence() {
        let wxs = render_sample();
        assert!(wxs.contains(r#"Return="asyncNoWait""#));
        assert!(wxs.contains(r#"<Custom Action="LaunchApp" After="InstallFinalize">"#));
    }
}
