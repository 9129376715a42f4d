//! Walks a source tree for gated files and builds the package catalog.

use crate::error::{io_err, Error};
use crate::namespace::{cli_name, snake_ident, NameCounter};
use crate::vfs::Vfs;
use crate::LIST_SUBCOMMAND;

use log::debug;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use targ_parse::{parse_task_source, CommandInfo, FileInfo};

/// All gated files of one directory. Produced by discovery; immutable.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PackageInfo {
    /// Identifier derived from the directory name.
    pub package: String,
    /// Absolute directory.
    pub dir: PathBuf,
    /// Package-level doc: the first non-empty file doc, in path order.
    pub doc: String,
    pub files: Vec<FileInfo>,
    /// Union of the files' commands.
    pub commands: Vec<CommandInfo>,
}

/// Walk from `start_dir`, gather gated files and group them by directory.
/// The result is ordered by directory path.
pub fn discover(
    fs: &dyn Vfs,
    start_dir: &Path,
    token: &str,
) -> Result<Vec<PackageInfo>, Error> {
    let mut by_dir: BTreeMap<PathBuf, Vec<FileInfo>> = BTreeMap::new();

    for path in fs.walk(start_dir).map_err(|e| io_err(e, start_dir))? {
        if path.extension().map_or(true, |ext| ext != "rs") {
            continue;
        }
        let rel = path.strip_prefix(start_dir).unwrap_or(&path);
        if is_skipped(rel) {
            continue;
        }
        let bytes = fs.read(&path).map_err(|e| io_err(e, &path))?;
        let src = match String::from_utf8(bytes) {
            Ok(src) => src,
            Err(_) => {
                debug!("skipping non-utf8 source {}", path.display());
                continue;
            }
        };
        let Some(info) = parse_task_source(&src, &path, token)? else {
            continue;
        };
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| start_dir.to_path_buf());
        by_dir.entry(dir).or_default().push(info);
    }

    let mut packages = Vec::new();
    for (dir, mut files) in by_dir {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        assign_mod_names(&mut files);
        let package = package_ident(&dir);
        let doc = files
            .iter()
            .map(|file| file.doc.as_str())
            .find(|doc| !doc.is_empty())
            .unwrap_or_default()
            .to_string();
        let commands: Vec<CommandInfo> = files
            .iter()
            .flat_map(|file| file.commands.iter().cloned())
            .collect();
        if commands.is_empty() {
            return Err(Error::InputMisuse(format!(
                "{}: gated files declare no targets",
                dir.display()
            )));
        }
        check_reserved(&commands)?;
        packages.push(PackageInfo {
            package,
            dir,
            doc,
            files,
            commands,
        });
    }
    Ok(packages)
}

/// Hidden and underscore-prefixed entries and `target` directories never
/// participate, which also keeps generated wrapper files out of a
/// subsequent discovery pass.
fn is_skipped(rel: &Path) -> bool {
    rel.components().any(|component| match component {
        Component::Normal(part) => {
            let name = part.to_string_lossy();
            name.starts_with('.') || name.starts_with('_') || name == "target"
        }
        _ => false,
    })
}

/// Mint the bootstrap module identifier of each file; deterministic because
/// the file list is path-sorted.
fn assign_mod_names(files: &mut [FileInfo]) {
    let mut counter = NameCounter::new();
    for file in files {
        let stem = Path::new(&file.base)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        file.mod_name = counter.claim(&snake_ident(&stem));
    }
}

/// Identifier derived from the directory name.
pub fn package_ident(dir: &Path) -> String {
    let name = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    snake_ident(&name)
}

fn check_reserved(commands: &[CommandInfo]) -> Result<(), Error> {
    for command in commands {
        if command.name == LIST_SUBCOMMAND
            || cli_name(&command.name) == LIST_SUBCOMMAND
        {
            return Err(Error::InputMisuse(format!(
                "{}: target {} collides with the reserved {} subcommand",
                command.file.display(),
                command.name,
                LIST_SUBCOMMAND
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod discovery_tests {
    use super::*;

    use crate::vfs::MemFs;
    use targ_parse::CommandKind;

    const GATE: &str = "#![cfg(targ)]\n";

    fn gated(body: &str) -> String {
        format!("{GATE}{body}")
    }

    #[test]
    fn discover_groups_by_directory_test() {
        let fs = MemFs::new();
        fs.seed(
            "/proj/tools/issues/issues.rs",
            gated("pub struct List;\nimpl List { pub fn run(&self) {} }\n"),
        );
        fs.seed(
            "/proj/tools/other/foo.rs",
            gated("pub struct Thing;\nimpl Thing { pub fn run(&self) {} }\n"),
        );
        fs.seed(
            "/proj/tools/other/bar.rs",
            gated("pub struct Ship;\nimpl Ship { pub fn run(&self) {} }\n"),
        );

        let packages = discover(&fs, Path::new("/proj"), "targ").unwrap();

        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].dir, PathBuf::from("/proj/tools/issues"));
        assert_eq!(packages[0].package, "issues");
        assert_eq!(packages[1].dir, PathBuf::from("/proj/tools/other"));
        assert_eq!(packages[1].files.len(), 2);
        // files are path-sorted: bar.rs before foo.rs
        assert_eq!(packages[1].files[0].base, "bar.rs");
        assert_eq!(packages[1].commands.len(), 2);
    }

    #[test]
    fn ungated_files_contribute_nothing_test() {
        let fs = MemFs::new();
        fs.seed(
            "/proj/tasks.rs",
            gated("pub struct Build;\nimpl Build { pub fn run(&self) {} }\n"),
        );
        fs.seed(
            "/proj/not-a-target.rs",
            "pub struct Haunted;\nimpl Haunted { pub fn run(&self) {} }\n",
        );

        let packages = discover(&fs, Path::new("/proj"), "targ").unwrap();

        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].commands.len(), 1);
        assert_eq!(packages[0].commands[0].name, "Build");
    }

    #[test]
    fn hidden_and_target_dirs_are_skipped_test() {
        let fs = MemFs::new();
        fs.seed("/proj/.git/junk.rs", gated("pub fn sneaky() {}\n"));
        fs.seed("/proj/.targ_wrappers.rs", gated("pub fn stale() {}\n"));
        fs.seed("/proj/_drafts/wip.rs", gated("pub fn wip() {}\n"));
        fs.seed("/proj/target/debug/gen.rs", gated("pub fn gen2() {}\n"));
        fs.seed("/proj/real.rs", gated("pub fn real_one() {}\n"));

        let packages = discover(&fs, Path::new("/proj"), "targ").unwrap();

        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].commands[0].name, "real_one");
    }

    #[test]
    fn function_targets_are_discovered_test() {
        let fs = MemFs::new();
        fs.seed(
            "/proj/t.rs",
            gated("/// clean removes build artifacts.\npub fn clean() {}\n"),
        );

        let packages = discover(&fs, Path::new("/proj"), "targ").unwrap();

        assert_eq!(packages[0].commands.len(), 1);
        let command = &packages[0].commands[0];
        assert_eq!(command.kind, CommandKind::Func);
        assert_eq!(command.name, "clean");
        assert_eq!(packages[0].files[0].mod_name, "t");
    }

    #[test]
    fn main_in_gated_file_is_fatal_test() {
        let fs = MemFs::new();
        fs.seed("/proj/t.rs", gated("fn main() {}\npub fn x() {}\n"));

        let result = discover(&fs, Path::new("/proj"), "targ");

        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn empty_package_is_fatal_test() {
        let fs = MemFs::new();
        fs.seed("/proj/t.rs", gated("// nothing exported\n"));

        let result = discover(&fs, Path::new("/proj"), "targ");

        assert!(matches!(result, Err(Error::InputMisuse(_))));
    }

    #[test]
    fn reserved_list_name_is_fatal_test() {
        let fs = MemFs::new();
        fs.seed("/proj/t.rs", gated("pub fn __list() {}\n"));

        let result = discover(&fs, Path::new("/proj"), "targ");

        assert!(matches!(result, Err(Error::InputMisuse(_))));
    }

    #[test]
    fn mod_names_are_deduplicated_test() {
        let fs = MemFs::new();
        fs.seed("/proj/a-b.rs", gated("pub fn one() {}\n"));
        fs.seed("/proj/a_b.rs", gated("pub fn two() {}\n"));

        let packages = discover(&fs, Path::new("/proj"), "targ").unwrap();

        let names: Vec<&str> = packages[0]
            .files
            .iter()
            .map(|file| file.mod_name.as_str())
            .collect();
        assert_eq!(names, vec!["a_b", "a_b2"]);
    }

    #[test]
    fn package_doc_comes_from_first_documented_file_test() {
        let fs = MemFs::new();
        fs.seed("/proj/a.rs", gated("pub fn one() {}\n"));
        fs.seed(
            "/proj/b.rs",
            gated("//! Build targets.\npub fn two() {}\n"),
        );

        let packages = discover(&fs, Path::new("/proj"), "targ").unwrap();

        assert_eq!(packages[0].doc, "Build targets.");
    }
}
