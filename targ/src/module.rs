//! Locating the enclosing cargo package for each target directory and
//! grouping targets by it. Each group compiles to one dispatch binary.

use crate::discovery::PackageInfo;
use crate::error::Error;
use crate::vfs::Vfs;

use log::{debug, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use strum_macros::Display;
use toml::Table;

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum ModuleKind {
    /// Targets enclosed by a real `Cargo.toml`.
    #[strum(serialize = "module")]
    Module,
    /// No enclosing manifest anywhere; a staging manifest is synthesized.
    #[strum(serialize = "fallback")]
    Fallback,
}

/// A set of target packages sharing an enclosing module descriptor. Produced
/// by grouping; consumed once per group.
#[derive(Clone, Debug)]
pub struct ModuleGroup {
    /// Directory containing the module descriptor (the start directory for
    /// fallback groups).
    pub module_root: PathBuf,
    /// Declared `package.name`, or a derived name for fallback groups.
    pub module_path: String,
    pub kind: ModuleKind,
    pub packages: Vec<PackageInfo>,
    /// The module's `[dependencies]` table with relative paths re-anchored
    /// and `workspace = true` entries resolved; copied into the staging
    /// manifest.
    pub dependencies: Table,
}

impl ModuleGroup {
    pub fn is_fallback(&self) -> bool {
        self.kind == ModuleKind::Fallback
    }
}

/// Group discovered packages by their enclosing module root, ordered by
/// root path. Fallback packages coalesce into a single group rooted at the
/// start directory.
pub fn group_packages(
    fs: &dyn Vfs,
    packages: Vec<PackageInfo>,
    start_dir: &Path,
) -> Result<Vec<ModuleGroup>, Error> {
    let mut grouped: BTreeMap<PathBuf, ModuleGroup> = BTreeMap::new();

    for package in packages {
        let group = match find_module(fs, &package.dir)? {
            Some((module_root, manifest)) => {
                grouped.entry(module_root.clone()).or_insert_with(|| {
                    let module_path = manifest
                        .get("package")
                        .and_then(|p| p.get("name"))
                        .and_then(|n| n.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| derived_name(&module_root));
                    let dependencies =
                        resolve_dependencies(fs, &module_root, &manifest);
                    debug!(
                        "module {} at {}",
                        module_path,
                        module_root.display()
                    );
                    ModuleGroup {
                        module_root,
                        module_path,
                        kind: ModuleKind::Module,
                        packages: Vec::new(),
                        dependencies,
                    }
                })
            }
            None => grouped
                .entry(start_dir.to_path_buf())
                .or_insert_with(|| ModuleGroup {
                    module_root: start_dir.to_path_buf(),
                    module_path: format!(
                        "targ-fallback/{}",
                        derived_name(start_dir)
                    ),
                    kind: ModuleKind::Fallback,
                    packages: Vec::new(),
                    dependencies: Table::new(),
                }),
        };
        group.packages.push(package);
    }

    Ok(grouped.into_values().collect())
}

/// Walk upward from `dir` for the nearest `Cargo.toml`.
fn find_module(
    fs: &dyn Vfs,
    dir: &Path,
) -> Result<Option<(PathBuf, Table)>, Error> {
    for ancestor in dir.ancestors() {
        let manifest_path = ancestor.join("Cargo.toml");
        let Ok(bytes) = fs.read(&manifest_path) else {
            continue;
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let manifest: Table = toml::from_str(&text).map_err(|e| {
            Error::InputMisuse(format!(
                "{}: invalid manifest: {}",
                manifest_path.display(),
                e
            ))
        })?;
        return Ok(Some((ancestor.to_path_buf(), manifest)));
    }
    Ok(None)
}

fn derived_name(dir: &Path) -> String {
    let name = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let cleaned = cleaned.trim_matches('-').to_ascii_lowercase();
    if cleaned.is_empty() {
        "targets".to_string()
    } else {
        cleaned
    }
}

/// The `[dependencies]` table made location-independent: relative `path`
/// entries become absolute and `workspace = true` entries are replaced by
/// the matching `[workspace.dependencies]` entry.
fn resolve_dependencies(
    fs: &dyn Vfs,
    module_root: &Path,
    manifest: &Table,
) -> Table {
    let mut resolved = Table::new();
    let Some(deps) = manifest.get("dependencies").and_then(|d| d.as_table())
    else {
        return resolved;
    };
    for (name, value) in deps {
        match resolve_dependency(fs, module_root, name, value) {
            Some(entry) => {
                resolved.insert(name.clone(), entry);
            }
            None => warn!(
                "dropping dependency {name}: workspace entry not found above {}",
                module_root.display()
            ),
        }
    }
    resolved
}

fn resolve_dependency(
    fs: &dyn Vfs,
    module_root: &Path,
    name: &str,
    value: &toml::Value,
) -> Option<toml::Value> {
    let Some(member) = value.as_table() else {
        return Some(value.clone());
    };
    let from_workspace = member
        .get("workspace")
        .and_then(|w| w.as_bool())
        .unwrap_or(false);
    if !from_workspace {
        let mut table = member.clone();
        anchor_path(&mut table, module_root);
        return Some(toml::Value::Table(table));
    }

    let (workspace_root, workspace_value) =
        find_workspace_dependency(fs, module_root, name)?;
    let mut table = match workspace_value {
        toml::Value::String(version) => {
            let mut table = Table::new();
            table.insert("version".to_string(), toml::Value::String(version));
            table
        }
        toml::Value::Table(table) => table,
        other => return Some(other),
    };
    anchor_path(&mut table, &workspace_root);

    // Member entries may narrow the workspace entry.
    if let Some(features) = member.get("features") {
        let mut merged = table
            .get("features")
            .and_then(|f| f.as_array())
            .cloned()
            .unwrap_or_default();
        if let Some(extra) = features.as_array() {
            for feature in extra {
                if !merged.contains(feature) {
                    merged.push(feature.clone());
                }
            }
        }
        table.insert("features".to_string(), toml::Value::Array(merged));
    }
    if let Some(default_features) = member.get("default-features") {
        table.insert("default-features".to_string(), default_features.clone());
    }
    Some(toml::Value::Table(table))
}

fn anchor_path(table: &mut Table, base: &Path) {
    let Some(path) = table.get("path").and_then(|p| p.as_str()) else {
        return;
    };
    let path = Path::new(path);
    if path.is_absolute() {
        return;
    }
    let absolute = base.join(path);
    table.insert(
        "path".to_string(),
        toml::Value::String(absolute.to_string_lossy().into_owned()),
    );
}

/// Walk upward from above `module_root` for a manifest declaring
/// `[workspace.dependencies]` containing `name`.
fn find_workspace_dependency(
    fs: &dyn Vfs,
    module_root: &Path,
    name: &str,
) -> Option<(PathBuf, toml::Value)> {
    for ancestor in module_root.ancestors() {
        let manifest_path = ancestor.join("Cargo.toml");
        let Ok(bytes) = fs.read(&manifest_path) else {
            continue;
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let Ok(manifest) = toml::from_str::<Table>(&text) else {
            continue;
        };
        let entry = manifest
            .get("workspace")
            .and_then(|w| w.get("dependencies"))
            .and_then(|d| d.get(name));
        if let Some(entry) = entry {
            return Some((ancestor.to_path_buf(), entry.clone()));
        }
    }
    None
}
