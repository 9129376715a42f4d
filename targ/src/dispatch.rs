//! Multi-module dispatch. When the target tree spans several modules, each
//! module compiles to its own binary; the runner asks every binary for its
//! command list through the reserved introspection subcommand and routes
//! the requested command to the first binary that claims it.

use crate::error::Error;
use crate::exec;
use crate::LIST_SUBCOMMAND;

use std::io::Write;
use std::path::{Path, PathBuf};
use targ_serde::{CommandEntry, CommandReport};

/// One built module group: its binary and the commands it claims.
#[derive(Clone, Debug)]
pub struct ModuleBinary {
    pub module_path: String,
    pub binary: PathBuf,
    pub report: CommandReport,
}

/// Ask a bootstrap binary for its command list.
pub fn introspect(binary: &Path) -> Result<CommandReport, Error> {
    let stdout =
        exec::run_for_stdout(binary, &[LIST_SUBCOMMAND.to_string()])?;
    serde_json::from_slice(&stdout).map_err(|e| {
        Error::InputMisuse(format!(
            "{}: invalid introspection report: {}",
            binary.display(),
            e
        ))
    })
}

/// The leading non-flag tokens of the forwarded arguments name the
/// requested command.
pub fn requested_command(args: &[String]) -> Vec<String> {
    args.iter()
        .take_while(|arg| !arg.starts_with('-'))
        .cloned()
        .collect()
}

/// The first binary whose command list contains (or is prefixed by) the
/// requested command.
pub fn select<'a>(
    binaries: &'a [ModuleBinary],
    args: &[String],
) -> Option<&'a ModuleBinary> {
    let requested = requested_command(args);
    binaries
        .iter()
        .find(|binary| binary.report.matches(&requested))
}

/// A help request reaches the runner when there is nothing to dispatch.
pub fn wants_help(args: &[String]) -> bool {
    match args.first() {
        None => true,
        Some(first) => first == "-h" || first == "--help",
    }
}

/// Merged sorted listing across all modules.
pub fn write_help(
    binaries: &[ModuleBinary],
    out: &mut impl Write,
) -> std::io::Result<()> {
    let reports: Vec<CommandReport> = binaries
        .iter()
        .map(|binary| binary.report.clone())
        .collect();
    let merged = CommandReport::merged(&reports);
    let width = merged
        .iter()
        .map(|entry| entry.name.len())
        .max()
        .unwrap_or(0);
    writeln!(out, "Available commands:")?;
    for CommandEntry { name, description } in &merged {
        if description.is_empty() {
            writeln!(out, "  {name}")?;
        } else {
            writeln!(out, "  {name:<width$}  {description}")?;
        }
    }
    Ok(())
}
