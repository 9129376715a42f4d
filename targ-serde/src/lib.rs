//! targ-serde
//! ==========
//!
//! This crate provides definitions to serialize the command introspection
//! report exchanged between the `targ` runner and compiled bootstrap
//! binaries (the `__list` subcommand output).

#![forbid(unsafe_code)]

mod report;

pub use report::{CommandEntry, CommandReport};
