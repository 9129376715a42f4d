use std::error;
use std::fmt;
use std::io;
use std::path::PathBuf;
use targ_parse::ParseFileError;

/// Runner-side failures. Child exit codes are not errors; they propagate as
/// ordinary return values so they can pass through unwrapped and unprinted.
#[derive(Debug)]
pub enum Error {
    /// The user's source tree or invocation is malformed. Surfaced verbatim.
    InputMisuse(String),

    /// Read/write/walk failure, wrapped with the related path.
    Io(io::Error, PathBuf),

    /// A gated file failed to parse.
    Parse(ParseFileError),

    /// The toolchain exited non-zero. Holds its captured stderr, forwarded
    /// verbatim.
    Toolchain(String),

    /// The runner received a terminating signal. Holds the signal-derived
    /// exit code.
    Cancelled(i32),
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Cancelled(code) => *code,
            _ => 1,
        }
    }

    /// Print the one-line diagnostic (or the verbatim toolchain output) to
    /// stderr. Cancellation prints nothing; the shell already echoed the
    /// interrupt.
    pub fn render(&self) {
        match self {
            Error::Toolchain(stderr) => eprint!("{stderr}"),
            Error::Cancelled(_) => {}
            other => eprintln!("targ: {other}"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InputMisuse(message) => write!(f, "{message}"),
            Error::Io(e, path) => write!(f, "{}: {}", path.display(), e),
            Error::Parse(ParseFileError::MainDeclared(path)) => write!(
                f,
                "{}: gated file declares fn main; the generated entry point \
                 owns main, declare targets in a library-style file",
                path.display()
            ),
            Error::Parse(e) => write!(f, "{e}"),
            Error::Toolchain(stderr) => write!(f, "{stderr}"),
            Error::Cancelled(code) => write!(f, "interrupted (exit {code})"),
        }
    }
}

impl error::Error for Error {}

impl From<ParseFileError> for Error {
    fn from(e: ParseFileError) -> Self {
        Error::Parse(e)
    }
}

/// Attach a path to a bare I/O error.
pub fn io_err(e: io::Error, path: impl Into<PathBuf>) -> Error {
    Error::Io(e, path.into())
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn exit_codes_test() {
        assert_eq!(Error::InputMisuse("x".into()).exit_code(), 1);
        assert_eq!(Error::Toolchain("boom".into()).exit_code(), 1);
        assert_eq!(Error::Cancelled(130).exit_code(), 130);
    }

    #[test]
    fn io_error_mentions_path_test() {
        let e = io_err(
            io::Error::new(io::ErrorKind::NotFound, "gone"),
            "/proj/tasks.rs",
        );
        let printed = e.to_string();
        assert!(printed.contains("/proj/tasks.rs"));
        assert!(printed.contains("gone"));
    }

    #[test]
    fn main_declared_is_user_facing_test() {
        let e = Error::Parse(ParseFileError::MainDeclared(PathBuf::from(
            "/proj/t.rs",
        )));
        assert!(e.to_string().contains("declares fn main"));
    }
}
