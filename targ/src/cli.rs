//! Driver orchestration: discovery through execution for one invocation.

use crate::args::TargCli;
use crate::bootstrap;
use crate::build::{self, BuildConfig};
use crate::cache::{cache_key, CacheLayout, TaggedFile};
use crate::discovery::discover;
use crate::dispatch::{self, ModuleBinary};
use crate::error::{io_err, Error};
use crate::exec;
use crate::module::{group_packages, ModuleGroup, ModuleKind};
use crate::namespace::{synthesize, NameCounter};
use crate::vfs::{OsFs, Vfs};
use crate::wrapper::{self, CleanupList, WrapperSet};
use crate::GATE_TOKEN;

use log::{debug, info};
use std::path::Path;
use targ_serde::CommandReport;

/// Entry routine. Returns the exit code to propagate; wrapper cleanup runs
/// on every path out.
pub fn run(args: TargCli) -> Result<i32, Error> {
    args.validate()?;
    let fs = OsFs;
    let start_dir =
        std::env::current_dir().map_err(|e| io_err(e, "."))?;
    let cleanup = CleanupList::new(args.keep);
    exec::install_signal_handler(cleanup.clone());

    let result = drive(&fs, &start_dir, &args, &cleanup);
    cleanup.remove_all(&fs);
    result
}

fn drive(
    fs: &dyn Vfs,
    start_dir: &Path,
    args: &TargCli,
    cleanup: &CleanupList,
) -> Result<i32, Error> {
    let packages = discover(fs, start_dir, GATE_TOKEN)?;
    if packages.is_empty() {
        return Err(Error::InputMisuse(format!(
            "no {GATE_TOKEN}-gated files found under {}",
            start_dir.display()
        )));
    }
    info!(
        "discovered {} package(s) under {}",
        packages.len(),
        start_dir.display()
    );

    let wrappers = wrapper::generate(fs, &packages, GATE_TOKEN, cleanup)?;
    let groups = group_packages(fs, packages, start_dir)?;
    let layout = CacheLayout::resolve(start_dir)?;
    let config = BuildConfig {
        layout: &layout,
        gate: GATE_TOKEN,
        no_cache: args.no_cache,
        keep: args.keep,
    };

    let mut built = Vec::new();
    for group in &groups {
        let binary = prepare_group(fs, &config, group, &wrappers, start_dir)?;
        built.push(binary);
    }

    let child_args = args.child_args();
    let bin_name = invoking_bin_name();

    if let [only] = &built[..] {
        return exec::run_child(&only.binary, &child_args, &bin_name);
    }

    for binary in &mut built {
        binary.report = dispatch::introspect(&binary.binary)?;
        debug!(
            "module {} claims {} command(s)",
            binary.module_path,
            binary.report.commands.len()
        );
    }
    if dispatch::wants_help(&args.command) {
        dispatch::write_help(&built, &mut std::io::stdout())
            .map_err(|e| io_err(e, "stdout"))?;
        return Ok(0);
    }
    match dispatch::select(&built, &args.command) {
        Some(target) => {
            exec::run_child(&target.binary, &child_args, &bin_name)
        }
        None => Err(Error::InputMisuse(format!(
            "no module claims command {:?}; try --help",
            args.command.first().map(String::as_str).unwrap_or("")
        ))),
    }
}

/// Namespace synthesis, bootstrap emission, fingerprinting and (when the
/// cache misses) compilation for one module group.
fn prepare_group(
    fs: &dyn Vfs,
    config: &BuildConfig,
    group: &ModuleGroup,
    wrappers: &WrapperSet,
    start_dir: &Path,
) -> Result<ModuleBinary, Error> {
    let mut counter = NameCounter::new();
    let tree = synthesize(&group.packages, start_dir, &mut counter)?;

    let source = match group.kind {
        ModuleKind::Fallback => {
            let mirror = build::mirror_root(config.layout, group)?;
            let module_root = group.module_root.clone();
            bootstrap::emit(group, &tree, wrappers, &mut counter, &|dir| {
                build::map_into_mirror(&mirror, &module_root, dir)
            })?
        }
        ModuleKind::Module => bootstrap::emit(
            group,
            &tree,
            wrappers,
            &mut counter,
            &|dir| dir.to_path_buf(),
        )?,
    };

    let inputs = collect_inputs(fs, group, wrappers)?;
    let key = cache_key(
        &group.module_path,
        &group.module_root,
        config.gate,
        source.as_bytes(),
        &inputs,
    )?;
    debug!("module {} key {key}", group.module_path);

    let binary = build::ensure_binary(config, group, &source, &key)?;
    Ok(ModuleBinary {
        module_path: group.module_path.clone(),
        binary,
        report: CommandReport::default(),
    })
}

/// The fingerprint inputs of a group: every gated file plus every wrapper
/// file written into the group's packages.
fn collect_inputs(
    fs: &dyn Vfs,
    group: &ModuleGroup,
    wrappers: &WrapperSet,
) -> Result<Vec<TaggedFile>, Error> {
    let mut inputs = Vec::new();
    for package in &group.packages {
        for file in &package.files {
            let content =
                fs.read(&file.path).map_err(|e| io_err(e, &file.path))?;
            inputs.push(TaggedFile::new(file.path.clone(), content));
        }
        if let Some(wrapper_file) = wrappers.files_in(&package.dir) {
            let content = fs
                .read(&wrapper_file.path)
                .map_err(|e| io_err(e, &wrapper_file.path))?;
            inputs.push(TaggedFile::new(wrapper_file.path.clone(), content));
        }
    }
    Ok(inputs)
}

/// The invoking binary's base name, injected into the child for help
/// rendering.
fn invoking_bin_name() -> String {
    std::env::args()
        .next()
        .and_then(|arg0| {
            Path::new(&arg0)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "targ".to_string())
}

#[cfg(test)]
mod cli_tests {
    use super::*;

    use crate::vfs::MemFs;

    #[test]
    fn collect_inputs_covers_gated_and_wrapper_files_test() {
        let fs = MemFs::new();
        fs.seed("/proj/t.rs", "#![cfg(targ)]\npub fn clean() {}\n");
        let packages = discover(&fs, Path::new("/proj"), "targ").unwrap();
        let wrappers = wrapper::generate(
            &fs,
            &packages,
            "targ",
            &CleanupList::new(false),
        )
        .unwrap();
        let groups =
            group_packages(&fs, packages, Path::new("/proj")).unwrap();

        let inputs = collect_inputs(&fs, &groups[0], &wrappers).unwrap();

        let paths: Vec<String> = inputs
            .iter()
            .map(|input| input.path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(paths, vec!["/proj/t.rs", "/proj/.targ_wrappers.rs"]);
    }

    #[test]
    fn ungated_edits_leave_the_key_unchanged_test() {
        let fs = MemFs::new();
        fs.seed("/proj/t.rs", "#![cfg(targ)]\npub fn clean() {}\n");
        fs.seed("/proj/not-a-target.rs", "pub struct Haunted;\n");

        let key_of = |fs: &MemFs| {
            let packages = discover(fs, Path::new("/proj"), "targ").unwrap();
            let wrappers = wrapper::generate(
                fs,
                &packages,
                "targ",
                &CleanupList::new(false),
            )
            .unwrap();
            let groups =
                group_packages(fs, packages, Path::new("/proj")).unwrap();
            let inputs = collect_inputs(fs, &groups[0], &wrappers).unwrap();
            cache_key(
                &groups[0].module_path,
                &groups[0].module_root,
                "targ",
                b"boot",
                &inputs,
            )
            .unwrap()
        };

        let before = key_of(&fs);
        fs.seed("/proj/not-a-target.rs", "pub struct Haunted; // edited\n");
        let after = key_of(&fs);

        assert_eq!(before, after);
    }
}
