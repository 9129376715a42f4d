//! The CLI arguments parser using clap.

use crate::error::Error;

use clap::Parser;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Parser, Debug)]
#[command(name = "targ")]
#[command(about, author, version, bin_name = "targ")]
pub struct TargCli {
    /// Bypass the binary cache and rebuild even when a cached binary exists.
    #[arg(long)]
    pub no_cache: bool,

    /// Keep staging directories and generated wrapper files for inspection.
    #[arg(long)]
    pub keep: bool,

    /// Wall-clock limit forwarded to the dispatched command, e.g. 90s or 5m.
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,

    #[command(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,

    /// Command and arguments, forwarded to the compiled dispatch binary
    /// verbatim.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl TargCli {
    pub fn from_cli() -> Result<Self, clap::Error> {
        TargCli::try_parse()
    }

    /// The argument vector handed to the child: the forwarded command, with
    /// `--timeout` prepended when given.
    pub fn child_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(timeout) = &self.timeout {
            args.push("--timeout".to_string());
            args.push(timeout.clone());
        }
        args.extend(self.command.iter().cloned());
        args
    }

    pub fn validate(&self) -> Result<(), Error> {
        if let Some(timeout) = &self.timeout {
            validate_timeout(timeout)?;
        }
        Ok(())
    }
}

/// Durations are an integer with an optional ms/s/m/h unit; the bootstrap
/// parses the same grammar.
fn validate_timeout(duration: &str) -> Result<(), Error> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^[0-9]+(ms|s|m|h)?$").unwrap());
    if pattern.is_match(duration) {
        Ok(())
    } else {
        Err(Error::InputMisuse(format!(
            "invalid --timeout {duration:?}: expected an integer with an \
             optional ms/s/m/h unit"
        )))
    }
}
