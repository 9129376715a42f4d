//! Function-target wrapper generation.
//!
//! Bare functions are erased into sibling struct types whose `run` forwards
//! to the function, so the bootstrap only ever instantiates struct types.
//! Wrapper files are gated like user sources and participate in the cache
//! key, but they live in the user's tree and must be removed on every exit
//! path unless `--keep`.

use crate::discovery::PackageInfo;
use crate::error::{io_err, Error};
use crate::namespace::{camel_ident, NameCounter};
use crate::vfs::Vfs;

use log::{debug, warn};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use targ_parse::{CommandInfo, CommandKind};

/// Reserved wrapper file name; the leading dot keeps it out of discovery.
pub const WRAPPER_FILE_NAME: &str = ".targ_wrappers.rs";

/// One synthesized wrapper struct.
#[derive(Clone, Debug)]
pub struct WrapperStruct {
    pub type_name: String,
    pub fn_name: String,
    /// Bootstrap module identifier of the declaring file.
    pub file_mod: String,
    /// The file declaring the wrapped function.
    pub source_file: PathBuf,
    pub uses_ctx: bool,
    pub returns_error: bool,
    pub description: String,
}

/// One wrapper file written into a package directory.
#[derive(Clone, Debug)]
pub struct WrapperFile {
    pub package_dir: PathBuf,
    pub path: PathBuf,
    /// Bootstrap module identifier of the wrapper file itself.
    pub mod_name: String,
    pub structs: Vec<WrapperStruct>,
}

/// All wrappers written for one run.
#[derive(Clone, Debug, Default)]
pub struct WrapperSet {
    pub files: Vec<WrapperFile>,
}

impl WrapperSet {
    /// The wrapper backing a FUNC command.
    pub fn lookup(
        &self,
        command: &CommandInfo,
    ) -> Option<(&WrapperFile, &WrapperStruct)> {
        self.files.iter().find_map(|file| {
            file.structs
                .iter()
                .find(|wrapper| {
                    wrapper.source_file == command.file
                        && wrapper.fn_name == command.name
                })
                .map(|wrapper| (file, wrapper))
        })
    }

    pub fn files_in(&self, package_dir: &Path) -> Option<&WrapperFile> {
        self.files.iter().find(|file| file.package_dir == package_dir)
    }
}

/// Wrapper paths registered for removal. Shared with the signal handler, so
/// cleanup also runs when the runner is interrupted before a child exists.
#[derive(Clone, Debug, Default)]
pub struct CleanupList {
    paths: Arc<Mutex<Vec<PathBuf>>>,
    keep: Arc<Mutex<bool>>,
}

impl CleanupList {
    pub fn new(keep: bool) -> Self {
        CleanupList {
            paths: Arc::default(),
            keep: Arc::new(Mutex::new(keep)),
        }
    }

    pub fn register(&self, path: &Path) {
        self.paths.lock().unwrap().push(path.to_path_buf());
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.lock().unwrap().clone()
    }

    /// Best-effort removal of every registered path.
    pub fn remove_all(&self, fs: &dyn Vfs) {
        if *self.keep.lock().unwrap() {
            debug!("--keep: leaving wrapper files in place");
            return;
        }
        for path in self.paths.lock().unwrap().drain(..) {
            if let Err(e) = fs.remove_file(&path) {
                warn!("failed to remove wrapper {}: {}", path.display(), e);
            }
        }
    }

    /// `std::fs` variant for the signal-handler thread.
    pub fn remove_all_os(&self) {
        if *self.keep.lock().unwrap() {
            return;
        }
        for path in self.paths.lock().unwrap().drain(..) {
            let _ = std::fs::remove_file(&path);
        }
    }
}

/// Write one wrapper file per package containing FUNC commands and register
/// each written path.
pub fn generate(
    fs: &dyn Vfs,
    packages: &[PackageInfo],
    token: &str,
    cleanup: &CleanupList,
) -> Result<WrapperSet, Error> {
    let mut set = WrapperSet::default();
    for package in packages {
        let funcs: Vec<&CommandInfo> = package
            .commands
            .iter()
            .filter(|command| command.kind == CommandKind::Func)
            .collect();
        if funcs.is_empty() {
            continue;
        }

        let mut mods = NameCounter::new();
        for file in &package.files {
            mods.reserve(&file.mod_name);
        }
        let mod_name = mods.claim("wrappers");

        let mut names = NameCounter::new();
        let cap_package = camel_ident(&package.package);
        let mut structs = Vec::new();
        for func in funcs {
            let base =
                format!("{cap_package}{}Func", camel_ident(&func.name));
            let file_mod = package
                .files
                .iter()
                .find(|file| file.path == func.file)
                .map(|file| file.mod_name.clone())
                .unwrap_or_default();
            structs.push(WrapperStruct {
                type_name: names.claim(&base),
                fn_name: func.name.clone(),
                file_mod,
                source_file: func.file.clone(),
                uses_ctx: func.uses_ctx,
                returns_error: func.returns_error,
                description: func.description.clone(),
            });
        }

        let path = package.dir.join(WRAPPER_FILE_NAME);
        let rendered = render(token, &structs);
        fs.write(&path, rendered.as_bytes())
            .map_err(|e| io_err(e, &path))?;
        cleanup.register(&path);
        debug!("wrote wrapper file {}", path.display());

        set.files.push(WrapperFile {
            package_dir: package.dir.clone(),
            path,
            mod_name,
            structs,
        });
    }
    Ok(set)
}

fn render(token: &str, structs: &[WrapperStruct]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "//! Function-target shims written by targ; removed after every run.");
    let _ = writeln!(out, "#![cfg({token})]");
    for wrapper in structs {
        let _ = writeln!(out);
        for line in wrapper.description.lines() {
            let _ = writeln!(out, "/// {line}");
        }
        let _ = writeln!(out, "pub struct {};", wrapper.type_name);
        let _ = writeln!(out);
        let _ = writeln!(out, "impl {} {{", wrapper.type_name);
        let call = if wrapper.uses_ctx {
            format!("super::{}::{}(ctx)", wrapper.file_mod, wrapper.fn_name)
        } else {
            format!("super::{}::{}()", wrapper.file_mod, wrapper.fn_name)
        };
        let params = if wrapper.uses_ctx {
            "&self, ctx: &targ_rt::Ctx"
        } else {
            "&self"
        };
        if wrapper.returns_error {
            let _ = writeln!(
                out,
                "    pub fn run({params}) -> Result<(), targ_rt::Failure> {{"
            );
            let _ = writeln!(out, "        targ_rt::check({call})");
        } else {
            let _ = writeln!(out, "    pub fn run({params}) {{");
            let _ = writeln!(out, "        {call}");
        }
        let _ = writeln!(out, "    }}");
        let _ = writeln!(out, "}}");
    }
    out
}

#[cfg(test)]
mod wrapper_tests {
    use super::*;

    use crate::discovery::discover;
    use crate::vfs::MemFs;

    fn fs_with_funcs() -> MemFs {
        let fs = MemFs::new();
        fs.seed(
            "/proj/t.rs",
            "#![cfg(targ)]\n\
             /// clean removes build artifacts.\n\
             pub fn clean() {}\n\
             pub fn watch(ctx: &targ_rt::Ctx) -> Result<(), targ_rt::Failure> {\n\
                 let _ = ctx;\n\
                 Ok(())\n\
             }\n",
        );
        fs
    }

    #[test]
    fn wrapper_file_is_written_beside_the_source_test() {
        let fs = fs_with_funcs();
        let packages = discover(&fs, Path::new("/proj"), "targ").unwrap();
        let cleanup = CleanupList::new(false);

        let set = generate(&fs, &packages, "targ", &cleanup).unwrap();

        assert_eq!(set.files.len(), 1);
        let file = &set.files[0];
        assert_eq!(file.path, PathBuf::from("/proj/.targ_wrappers.rs"));
        assert_eq!(file.mod_name, "wrappers");
        assert!(fs.contains(&file.path));
        assert_eq!(cleanup.paths(), vec![file.path.clone()]);
    }

    #[test]
    fn wrapper_naming_scheme_test() {
        let fs = fs_with_funcs();
        let packages = discover(&fs, Path::new("/proj"), "targ").unwrap();
        let set =
            generate(&fs, &packages, "targ", &CleanupList::new(false)).unwrap();

        let names: Vec<&str> = set.files[0]
            .structs
            .iter()
            .map(|wrapper| wrapper.type_name.as_str())
            .collect();
        assert_eq!(names, vec!["ProjCleanFunc", "ProjWatchFunc"]);
    }

    #[test]
    fn rendered_wrapper_is_gated_and_forwards_test() {
        let fs = fs_with_funcs();
        let packages = discover(&fs, Path::new("/proj"), "targ").unwrap();
        let set =
            generate(&fs, &packages, "targ", &CleanupList::new(false)).unwrap();

        let rendered =
            String::from_utf8(fs.read(&set.files[0].path).unwrap()).unwrap();

        assert!(targ_parse::source_is_gated(&rendered, "targ"));
        assert!(rendered.contains("pub struct ProjCleanFunc;"));
        assert!(rendered.contains("/// removes build artifacts."));
        assert!(rendered.contains("super::t::clean()"));
        assert!(rendered
            .contains("pub fn run(&self, ctx: &targ_rt::Ctx) -> Result<(), targ_rt::Failure> {"));
        assert!(rendered.contains("targ_rt::check(super::t::watch(ctx))"));
    }

    #[test]
    fn wrapper_lookup_test() {
        let fs = fs_with_funcs();
        let packages = discover(&fs, Path::new("/proj"), "targ").unwrap();
        let set =
            generate(&fs, &packages, "targ", &CleanupList::new(false)).unwrap();

        let clean = packages[0]
            .commands
            .iter()
            .find(|command| command.name == "clean")
            .unwrap();
        let (file, wrapper) = set.lookup(clean).unwrap();
        assert_eq!(file.mod_name, "wrappers");
        assert_eq!(wrapper.type_name, "ProjCleanFunc");
        assert!(!wrapper.uses_ctx);
    }

    #[test]
    fn cleanup_removes_registered_paths_test() {
        let fs = fs_with_funcs();
        let packages = discover(&fs, Path::new("/proj"), "targ").unwrap();
        let cleanup = CleanupList::new(false);
        let set = generate(&fs, &packages, "targ", &cleanup).unwrap();
        let path = set.files[0].path.clone();

        cleanup.remove_all(&fs);

        assert!(!fs.contains(&path));
    }

    #[test]
    fn keep_skips_cleanup_test() {
        let fs = fs_with_funcs();
        let packages = discover(&fs, Path::new("/proj"), "targ").unwrap();
        let cleanup = CleanupList::new(true);
        let set = generate(&fs, &packages, "targ", &cleanup).unwrap();
        let path = set.files[0].path.clone();

        cleanup.remove_all(&fs);

        assert!(fs.contains(&path));
    }

    #[test]
    fn struct_only_packages_get_no_wrapper_test() {
        let fs = MemFs::new();
        fs.seed(
            "/proj/tasks.rs",
            "#![cfg(targ)]\npub struct Build;\nimpl Build { pub fn run(&self) {} }\n",
        );
        let packages = discover(&fs, Path::new("/proj"), "targ").unwrap();

        let set =
            generate(&fs, &packages, "targ", &CleanupList::new(false)).unwrap();

        assert!(set.files.is_empty());
    }

    #[test]
    fn mod_name_avoids_user_file_collision_test() {
        let fs = MemFs::new();
        fs.seed("/proj/wrappers.rs", "#![cfg(targ)]\npub fn go() {}\n");
        let packages = discover(&fs, Path::new("/proj"), "targ").unwrap();

        let set =
            generate(&fs, &packages, "targ", &CleanupList::new(false)).unwrap();

        assert_eq!(packages[0].files[0].mod_name, "wrappers");
        assert_eq!(set.files[0].mod_name, "wrappers2");
    }
}
