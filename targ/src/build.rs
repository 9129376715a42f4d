//! Staging and toolchain invocation.
//!
//! Normal builds stage a synthesized cargo package in a unique directory
//! under the cache's `tmp/`; fallback builds stage inside a symlink mirror
//! of the moduleless source tree under `mod/<salt>/`, so the synthesized
//! manifest encloses the mirrored sources.

use crate::cache::{is_valid_binary, project_hash, CacheLayout};
use crate::error::{io_err, Error};
use crate::exec;
use crate::module::ModuleGroup;

use log::{debug, warn};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use toml::Table;

/// Version of the runtime crate pinned into synthesized manifests.
pub const TARG_RT_VERSION: &str = "0.6";

/// Package and binary name of the staged bootstrap.
pub const BOOTSTRAP_PACKAGE: &str = "targ-bootstrap";

/// Points the runtime dependency at an on-disk checkout during
/// development.
pub const RT_PATH_ENV: &str = "TARG_RT_PATH";

#[derive(Clone, Copy, Debug)]
pub struct BuildConfig<'a> {
    pub layout: &'a CacheLayout,
    pub gate: &'a str,
    pub no_cache: bool,
    pub keep: bool,
}

/// The mirror staging root for a fallback group, deterministic per module
/// root.
pub fn mirror_root(
    layout: &CacheLayout,
    group: &ModuleGroup,
) -> Result<PathBuf, Error> {
    Ok(layout.mod_dir().join(project_hash(&group.module_root)?))
}

/// Map a package directory into the mirror tree.
pub fn map_into_mirror(
    mirror: &Path,
    module_root: &Path,
    dir: &Path,
) -> PathBuf {
    let rel = dir.strip_prefix(module_root).unwrap_or(dir);
    if rel.as_os_str().is_empty() {
        mirror.to_path_buf()
    } else {
        mirror.join(rel)
    }
}

/// Return the cached binary for `key`, building it first when absent,
/// invalid or bypassed.
pub fn ensure_binary(
    config: &BuildConfig,
    group: &ModuleGroup,
    bootstrap_source: &str,
    key: &str,
) -> Result<PathBuf, Error> {
    let binary = config.layout.binary_path(key);
    if !config.no_cache && is_valid_binary(&binary) {
        debug!("cache hit: {}", binary.display());
        return Ok(binary);
    }
    build(config, group, bootstrap_source, &binary)?;
    Ok(binary)
}

fn build(
    config: &BuildConfig,
    group: &ModuleGroup,
    bootstrap_source: &str,
    binary: &Path,
) -> Result<(), Error> {
    let tmp_dir = config.layout.tmp_dir();
    std::fs::create_dir_all(&tmp_dir).map_err(|e| io_err(e, &tmp_dir))?;

    // Fallback builds stage inside the mirror so the manifest encloses the
    // sources; normal builds stage in a unique throwaway directory.
    let mut staging_guard = None;
    let staging_root = if group.is_fallback() {
        let mirror = mirror_root(config.layout, group)?;
        ensure_mirror(&mirror, &group.module_root)?;
        mirror
    } else {
        let staged = tempfile::Builder::new()
            .prefix("build_")
            .tempdir_in(&tmp_dir)
            .map_err(|e| io_err(e, &tmp_dir))?;
        let path = staged.path().to_path_buf();
        staging_guard = Some(staged);
        path
    };

    // Uniquely named bootstrap source; removed with staging unless --keep.
    let mut bootstrap_file = tempfile::Builder::new()
        .prefix("main_")
        .suffix(".rs")
        .tempfile_in(&staging_root)
        .map_err(|e| io_err(e, &staging_root))?;
    bootstrap_file
        .write_all(bootstrap_source.as_bytes())
        .map_err(|e| io_err(e, bootstrap_file.path()))?;
    let bootstrap_name = bootstrap_file
        .path()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let manifest = synthesize_manifest(group, &bootstrap_name, rt_dependency());
    let manifest_path = staging_root.join("Cargo.toml");
    std::fs::write(&manifest_path, manifest)
        .map_err(|e| io_err(e, &manifest_path))?;

    let target_dir = tmp_dir.join("target");
    run_cargo(config, &manifest_path, &target_dir)?;

    let built = target_dir
        .join("debug")
        .join(artifact_name(BOOTSTRAP_PACKAGE));
    let bin_dir = config.layout.bin_dir();
    std::fs::create_dir_all(&bin_dir).map_err(|e| io_err(e, &bin_dir))?;
    std::fs::rename(&built, binary).map_err(|e| io_err(e, &built))?;
    debug!("built {}", binary.display());

    if config.keep {
        if let Some(staged) = staging_guard {
            let _ = staged.into_path();
        }
        match bootstrap_file.keep() {
            Ok((_, path)) => {
                eprintln!("targ: keeping staging at {}", path.display());
            }
            Err(e) => warn!("failed to keep bootstrap source: {e}"),
        }
    }
    Ok(())
}

fn run_cargo(
    config: &BuildConfig,
    manifest_path: &Path,
    target_dir: &Path,
) -> Result<(), Error> {
    let cargo = std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let mut cmd = Command::new(cargo);
    cmd.arg("build")
        .arg("--manifest-path")
        .arg(manifest_path)
        .arg("--target-dir")
        .arg(target_dir)
        .env("RUSTFLAGS", gate_rustflags(config.gate));
    exec::run_toolchain(cmd)
}

/// Existing `RUSTFLAGS` with the gate predicate appended.
fn gate_rustflags(gate: &str) -> String {
    let existing = std::env::var("RUSTFLAGS").unwrap_or_default();
    if existing.is_empty() {
        format!("--cfg {gate}")
    } else {
        format!("{existing} --cfg {gate}")
    }
}

#[cfg(windows)]
fn artifact_name(package: &str) -> String {
    format!("{package}.exe")
}

#[cfg(not(windows))]
fn artifact_name(package: &str) -> String {
    package.to_string()
}

fn rt_dependency() -> toml::Value {
    rt_dependency_from(std::env::var(RT_PATH_ENV).ok())
}

fn rt_dependency_from(dev_path: Option<String>) -> toml::Value {
    match dev_path {
        Some(path) => {
            let mut table = Table::new();
            table.insert("path".to_string(), toml::Value::String(path));
            toml::Value::Table(table)
        }
        None => toml::Value::String(TARG_RT_VERSION.to_string()),
    }
}

/// The staging manifest: a single-binary package carrying the group's
/// re-anchored dependencies plus the runtime crate. The empty `[workspace]`
/// table keeps cargo from adopting the staging package into an enclosing
/// workspace.
pub fn synthesize_manifest(
    group: &ModuleGroup,
    bootstrap_file: &str,
    rt_dep: toml::Value,
) -> String {
    let mut package = Table::new();
    package.insert("name".into(), BOOTSTRAP_PACKAGE.into());
    package.insert("version".into(), "0.0.0".into());
    package.insert("edition".into(), "2021".into());
    package.insert("publish".into(), false.into());

    let mut bin = Table::new();
    bin.insert("name".into(), BOOTSTRAP_PACKAGE.into());
    bin.insert("path".into(), bootstrap_file.into());

    let mut dependencies = group.dependencies.clone();
    dependencies.entry("targ-rt".to_string()).or_insert(rt_dep);

    let mut rust_lints = Table::new();
    rust_lints.insert("unexpected_cfgs".into(), "allow".into());
    let mut lints = Table::new();
    lints.insert("rust".into(), toml::Value::Table(rust_lints));

    let mut manifest = Table::new();
    manifest.insert("package".into(), toml::Value::Table(package));
    manifest.insert(
        "bin".into(),
        toml::Value::Array(vec![toml::Value::Table(bin)]),
    );
    manifest.insert("dependencies".into(), toml::Value::Table(dependencies));
    manifest.insert("lints".into(), toml::Value::Table(lints));
    manifest.insert("workspace".into(), toml::Value::Table(Table::new()));

    toml::to_string(&manifest).expect("manifest tables always serialize")
}

/// Symlink the module root's top-level entries into the mirror, skipping
/// `.git`. Idempotent across runs.
fn ensure_mirror(mirror: &Path, module_root: &Path) -> Result<(), Error> {
    std::fs::create_dir_all(mirror).map_err(|e| io_err(e, mirror))?;
    let entries =
        std::fs::read_dir(module_root).map_err(|e| io_err(e, module_root))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(e, module_root))?;
        let name = entry.file_name();
        if name.to_string_lossy() == ".git" {
            continue;
        }
        let link = mirror.join(&name);
        if std::fs::symlink_metadata(&link).is_ok() {
            continue;
        }
        link_entry(&entry.path(), &link)?;
    }
    Ok(())
}

#[cfg(unix)]
fn link_entry(source: &Path, link: &Path) -> Result<(), Error> {
    std::os::unix::fs::symlink(source, link).map_err(|e| io_err(e, link))
}

#[cfg(not(unix))]
fn link_entry(source: &Path, _link: &Path) -> Result<(), Error> {
    warn!(
        "symlink mirrors are unsupported on this platform; {} not mirrored",
        source.display()
    );
    Ok(())
}
