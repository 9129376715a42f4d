//! targ-parse
//! ==========
//!
//! This crate provides the source-file parsing parts of `targ` that are
//! decoupled from the runner: build-gate detection and the classification of
//! gated declarations into a typed command catalog.

#![forbid(unsafe_code)]

pub mod find;
pub use find::*; // preserve APIs

mod classify;
mod gate;

pub use gate::source_is_gated;

use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::string::FromUtf8Error;

/// The discriminant of a discovered target.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommandKind {
    /// An exported struct type with a `run` method or subcommand fields.
    Struct,
    /// An exported niladic function, later erased into a wrapper struct.
    Func,
}

/// One target discovered in one file. Produced once by the parser and
/// immutable thereafter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInfo {
    /// Exported identifier as declared.
    pub name: String,
    pub kind: CommandKind,
    /// Absolute path of the declaring source file.
    pub file: PathBuf,
    /// Cleaned doc text with the identifier's own prefix stripped, possibly
    /// empty.
    pub description: String,
    /// The run method or function accepts a cancellation handle.
    pub uses_ctx: bool,
    /// The signature returns a failure value.
    pub returns_error: bool,
    /// The struct declares a `run` method (always true for `Func`).
    pub has_run: bool,
    /// The struct declares at least one subcommand-tagged field.
    pub has_subcommands: bool,
}

/// Parse result for a single gated `.rs` file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileInfo {
    pub path: PathBuf,
    pub base: String,
    /// File-level (`//!`) doc text, possibly empty.
    pub doc: String,
    /// Bootstrap module identifier for this file. Assigned by the runner
    /// during discovery; empty until then.
    pub mod_name: String,
    pub commands: Vec<CommandInfo>,
}

#[derive(Debug)]
pub enum ParseFileError {
    Io(io::Error, PathBuf),
    Utf8(FromUtf8Error, PathBuf),
    Syn(syn::Error, PathBuf),

    /// A gated file declares `fn main`. The generated bootstrap owns `main`
    /// and cannot include another entry point.
    MainDeclared(PathBuf),
}

impl Error for ParseFileError {}

/// Forward Display to Debug, probably good enough for
/// programmer facing error messages. The runner rewraps `MainDeclared`
/// into its user-facing diagnostic.
impl fmt::Display for ParseFileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
