//! Process-group cleanup for timed-out commands
//!
//! `conda run` starts the target command as its own child, so killing the
//! direct child leaves the model running. Commands are spawned as leaders of
//! a fresh process group and the whole group is signalled on timeout.

use std::io;
use tokio::process::Command;

/// Make the spawned child the leader of a new process group
#[cfg(unix)]
pub(crate) fn isolate_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
pub(crate) fn isolate_process_group(_cmd: &mut Command) {}

/// Send SIGKILL to every process in the group led by `pid`.
///
/// A group that has already exited is not an error.
#[cfg(unix)]
pub(crate) fn kill_process_group(pid: u32) -> io::Result<()> {
    let result = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if result == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn kill_process_group(_pid: u32) -> io::Result<()> {
    Ok(())
}
