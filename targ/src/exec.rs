//! Child-process lifecycle: launching the compiled dispatch binary and the
//! toolchain, forwarding stdio, propagating exit codes and killing child
//! process groups on cancellation.

use crate::error::{io_err, Error};
use crate::wrapper::CleanupList;
use crate::BIN_NAME_ENV;

use log::{debug, warn};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

static CANCELLED: AtomicBool = AtomicBool::new(false);
/// Pid of the one in-flight child, 0 when idle. The runner is a
/// single-threaded coordinator with one long-running child at a time.
static CURRENT_CHILD: AtomicI32 = AtomicI32::new(0);

pub fn was_cancelled() -> bool {
    CANCELLED.load(Ordering::SeqCst)
}

/// Install the termination handler once per process: kill the current
/// child's process group, or clean up and exit directly when no child is
/// running.
pub fn install_signal_handler(cleanup: CleanupList) {
    let result = ctrlc::set_handler(move || {
        CANCELLED.store(true, Ordering::SeqCst);
        let pid = CURRENT_CHILD.load(Ordering::SeqCst);
        if pid != 0 {
            kill_group(pid);
        } else {
            cleanup.remove_all_os();
            std::process::exit(130);
        }
    });
    if let Err(e) = result {
        warn!("could not install signal handler: {e}");
    }
}

#[cfg(unix)]
fn kill_group(pid: i32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // The child was spawned into its own process group, so one kill
    // reaches the whole subtree.
    if let Err(errno) = killpg(Pid::from_raw(pid), Signal::SIGTERM) {
        if errno != Errno::ESRCH {
            warn!("failed to terminate child group {pid}: {errno}");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: i32) {
    // Best effort only; without process groups the child is reaped when
    // the runner exits.
}

#[cfg(unix)]
fn configure_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn configure_group(_cmd: &mut Command) {}

fn track<T>(
    child_id: u32,
    wait: impl FnOnce() -> std::io::Result<T>,
) -> std::io::Result<T> {
    CURRENT_CHILD.store(child_id as i32, Ordering::SeqCst);
    let result = wait();
    CURRENT_CHILD.store(0, Ordering::SeqCst);
    result
}

/// The child's exit code, or the signal-derived code when it was killed.
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Run the compiled dispatch binary with the forwarded arguments, stdio
/// inherited, and propagate its exit code.
pub fn run_child(
    binary: &Path,
    args: &[String],
    bin_name: &str,
) -> Result<i32, Error> {
    let mut cmd = Command::new(binary);
    cmd.args(args).env(BIN_NAME_ENV, bin_name);
    configure_group(&mut cmd);
    debug!("executing {} {:?}", binary.display(), args);
    let mut child = cmd.spawn().map_err(|e| io_err(e, binary))?;
    let status = track(child.id(), || child.wait())
        .map_err(|e| io_err(e, binary))?;
    Ok(exit_code(&status))
}

/// Run a toolchain invocation: stdout is noise and discarded, stderr is
/// captured for forwarding on failure.
pub fn run_toolchain(mut cmd: Command) -> Result<(), Error> {
    cmd.stdout(Stdio::null()).stderr(Stdio::piped());
    configure_group(&mut cmd);
    debug!("toolchain: {cmd:?}");
    let child = cmd
        .spawn()
        .map_err(|e| io_err(e, Path::new(cmd.get_program())))?;
    let output = track(child.id(), || child.wait_with_output())
        .map_err(|e| io_err(e, Path::new("cargo")))?;
    if output.status.success() {
        return Ok(());
    }
    if was_cancelled() {
        return Err(Error::Cancelled(exit_code(&output.status)));
    }
    Err(Error::Toolchain(
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

/// Run a binary for its stdout (the `__list` introspection call).
pub fn run_for_stdout(
    binary: &Path,
    args: &[String],
) -> Result<Vec<u8>, Error> {
    let mut cmd = Command::new(binary);
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::null());
    configure_group(&mut cmd);
    let child = cmd.spawn().map_err(|e| io_err(e, binary))?;
    let output = track(child.id(), || child.wait_with_output())
        .map_err(|e| io_err(e, binary))?;
    if !output.status.success() {
        return Err(Error::InputMisuse(format!(
            "{}: introspection failed with exit code {}",
            binary.display(),
            exit_code(&output.status)
        )));
    }
    Ok(output.stdout)
}
