use super::{FileInfo, ParseFileError};

use crate::classify::{classify_file, file_doc};
use crate::gate::source_is_gated;

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Parse a single gated file into its command catalog entry.
///
/// Returns `Ok(None)` when the file does not carry the gate for `token`.
pub fn parse_task_file(
    path: &Path,
    token: &str,
) -> Result<Option<FileInfo>, ParseFileError> {
    let mut file = File::open(path)
        .map_err(|e| ParseFileError::Io(e, path.to_path_buf()))?;
    let mut src = vec![];
    file.read_to_end(&mut src)
        .map_err(|e| ParseFileError::Io(e, path.to_path_buf()))?;
    let src = String::from_utf8(src)
        .map_err(|e| ParseFileError::Utf8(e, path.to_path_buf()))?;
    parse_task_source(&src, path, token)
}

/// String-input variant of [`parse_task_file`].
pub fn parse_task_source(
    src: &str,
    path: &Path,
    token: &str,
) -> Result<Option<FileInfo>, ParseFileError> {
    if !source_is_gated(src, token) {
        return Ok(None);
    }
    let syntax = syn::parse_file(src)
        .map_err(|e| ParseFileError::Syn(e, path.to_path_buf()))?;
    let commands = classify_file(&syntax, path)
        .map_err(|()| ParseFileError::MainDeclared(path.to_path_buf()))?;
    Ok(Some(FileInfo {
        path: path.to_path_buf(),
        base: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        doc: file_doc(&syntax),
        mod_name: String::new(),
        commands,
    }))
}

#[cfg(test)]
mod find_tests {
    use super::*;

    use crate::CommandKind;
    use std::io::Write;
    use tempfile::tempdir;

    const GATED_SOURCE: &str = "#![cfg(targ)]\n\
//! Build targets for the project.\n\
\n\
/// Build compiles the project.\n\
pub struct Build;\n\
\n\
impl Build {\n\
    pub fn run(&self) -> Result<(), targ_rt::Failure> {\n\
        Ok(())\n\
    }\n\
}\n\
\n\
/// clean removes build artifacts.\n\
pub fn clean() {}\n";

    #[test]
    fn parse_task_source_gated_test() {
        let info = parse_task_source(GATED_SOURCE, Path::new("/proj/tasks.rs"), "targ")
            .unwrap()
            .unwrap();

        assert_eq!(info.base, "tasks.rs");
        assert_eq!(info.doc, "Build targets for the project.");
        assert_eq!(info.commands.len(), 2);
        assert_eq!(info.commands[0].name, "Build");
        assert_eq!(info.commands[0].kind, CommandKind::Struct);
        assert!(info.commands[0].returns_error);
        assert_eq!(info.commands[1].name, "clean");
        assert_eq!(info.commands[1].kind, CommandKind::Func);
    }

    #[test]
    fn parse_task_source_ungated_test() {
        let src = "pub struct Haunted;\nimpl Haunted { pub fn run(&self) {} }\n";
        let parsed =
            parse_task_source(src, Path::new("/proj/not-a-target.rs"), "targ").unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn parse_task_file_test() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("tasks.rs");
        let mut file = File::create(&file_path).unwrap();
        write!(file, "{}", GATED_SOURCE).unwrap();

        let info = parse_task_file(&file_path, "targ").unwrap().unwrap();

        assert_eq!(info.path, file_path);
        assert_eq!(info.commands.len(), 2);
    }

    #[test]
    fn parse_task_file_missing_is_io_error_test() {
        let result = parse_task_file(Path::new("/no/such/file.rs"), "targ");
        assert!(matches!(result, Err(ParseFileError::Io(_, _))));
    }

    #[test]
    fn parse_task_source_syntax_error_test() {
        let src = "#![cfg(targ)]\npub struct {\n";
        let result = parse_task_source(src, Path::new("/proj/broken.rs"), "targ");
        assert!(matches!(result, Err(ParseFileError::Syn(_, _))));
    }

    #[test]
    fn parse_task_source_main_is_fatal_test() {
        let src = "#![cfg(targ)]\nfn main() {}\n";
        let result = parse_task_source(src, Path::new("/proj/t.rs"), "targ");
        assert!(matches!(result, Err(ParseFileError::MainDeclared(_))));
    }
}
