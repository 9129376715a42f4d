//! The outer CLI parts of the `targ` runner executable.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use targ::args::TargCli;
use targ::cli;

#[allow(unused_imports)]
use log::{debug, error, info, log_enabled, Level};

fn main() {
    let args = match TargCli::from_cli() {
        Ok(args) => args,
        Err(e) => e.exit(), // clap::Error::exit()
    };

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    debug!("targ args = {:?}", args);

    match cli::run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            e.render();
            std::process::exit(e.exit_code());
        }
    }
}
