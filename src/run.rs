use std::ffi::OsStr;
use std::io;

use crate::config::PopenConfig;
use crate::error::PopenError;
use crate::process::{ExitStatus, Popen};

/// Run a command and wait for it to finish, returning its exit status.
///
/// A non-zero exit status is not an error here; inspect the returned status, or use
/// [`check_call`] instead.
///
/// # Deadlock hazard
///
/// `call` only waits. If `config` pipes stdout or stderr and the child writes more
/// than the OS pipe buffer holds, the child blocks on the full pipe and `call` never
/// returns. The same goes for a child waiting on a piped stdin, which `call` closes
/// only when it returns. Piped streams should be handled with [`Popen::create`] and
/// [`Popen::communicate`].
pub fn call(argv: &[impl AsRef<OsStr>], config: PopenConfig) -> io::Result<ExitStatus> {
    Popen::create(argv, config)?.wait()
}

/// Run a command, wait for it to finish, and fail unless it exited with code 0.
///
/// The error carries the arguments the command was started with and the exit status
/// it finished with. The deadlock hazard described at [`call`] applies here as well.
pub fn check_call(argv: &[impl AsRef<OsStr>], config: PopenConfig) -> Result<(), PopenError> {
    let mut p = Popen::create(argv, config)?;
    let status = p.wait()?;
    if !status.success() {
        return Err(PopenError::NonZeroExit {
            args: p.args().to_vec(),
            status,
        });
    }
    Ok(())
}
