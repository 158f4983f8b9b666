use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::PopenConfig;
use crate::{posix, spawn};

/// Exit status of a process.
///
/// This is an opaque type that wraps the status reported by `waitpid()`. Use the
/// provided methods to query it.
#[derive(Eq, PartialEq, Hash, Copy, Clone)]
pub struct ExitStatus(Option<i32>);

impl ExitStatus {
    /// Create an `ExitStatus` from the raw `waitpid()` status.
    pub(crate) fn from_raw(raw: i32) -> ExitStatus {
        ExitStatus(Some(raw))
    }

    /// The process is known to have finished, but its status could not be obtained.
    ///
    /// This happens when foreign code reaps the child before we do.
    pub(crate) fn undetermined() -> ExitStatus {
        ExitStatus(None)
    }

    /// True if the process exited with exit code 0.
    ///
    /// Any other exit code, as well as termination by a signal, is not a success.
    pub fn success(&self) -> bool {
        self.code() == Some(0)
    }

    /// Returns the exit code if the process exited normally.
    ///
    /// Returns `None` if the process was killed by a signal.
    pub fn code(&self) -> Option<u32> {
        let raw = self.0?;
        libc::WIFEXITED(raw).then(|| libc::WEXITSTATUS(raw) as u32)
    }

    /// Returns the signal number if the process was killed by a signal.
    pub fn signal(&self) -> Option<i32> {
        let raw = self.0?;
        libc::WIFSIGNALED(raw).then(|| libc::WTERMSIG(raw))
    }

    /// True if the process was killed by the signal with the specified number.
    pub fn is_killed_by(&self, signum: i32) -> bool {
        self.signal() == Some(signum)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(raw) if libc::WIFEXITED(raw) => {
                write!(f, "exit code {}", libc::WEXITSTATUS(raw))
            }
            Some(raw) if libc::WIFSIGNALED(raw) => {
                write!(f, "signal {}", libc::WTERMSIG(raw))
            }
            Some(raw) => write!(f, "unrecognized wait status: {} {:#x}", raw, raw),
            None => write!(f, "undetermined exit status"),
        }
    }
}

impl fmt::Debug for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(raw) if libc::WIFEXITED(raw) => {
                write!(f, "ExitStatus(Exited({}))", libc::WEXITSTATUS(raw))
            }
            Some(raw) if libc::WIFSIGNALED(raw) => {
                write!(f, "ExitStatus(Signal({}))", libc::WTERMSIG(raw))
            }
            Some(raw) => write!(f, "ExitStatus(Unknown({} {:#x}))", raw, raw),
            None => write!(f, "ExitStatus(Undetermined)"),
        }
    }
}

/// A handle to a spawned child process.
///
/// Created by [`Popen::create`]. The pid and the pipe ends are populated together when
/// the process is spawned; the exit status is filled in once, by the first call to
/// [`wait`](Self::wait) (or [`poll`](Self::poll)/[`wait_timeout`](Self::wait_timeout)
/// observing the exit), and never changes afterwards.
///
/// The `stdin`, `stdout` and `stderr` fields hold the parent's end of each stream
/// configured as [`Redirection::Pipe`]. They belong to the caller, who is expected to
/// `take()` them and close them when done. The ends the caller doesn't get have
/// already been closed in both processes, so a reader of `stdout` sees end-of-file as
/// soon as the child (and anything it passed the pipe to) exits.
///
/// # Drop behavior
///
/// When dropped, `Popen` first closes any pipe ends still stored in it, then waits
/// for the child to finish, unless [`detach`](Self::detach) was called.
///
/// [`Redirection::Pipe`]: crate::Redirection::Pipe
#[derive(Debug)]
pub struct Popen {
    /// Write end of the child's standard input, if stdin was `Pipe`.
    pub stdin: Option<File>,
    /// Read end of the child's standard output, if stdout was `Pipe`.
    pub stdout: Option<File>,
    /// Read end of the child's standard error, if stderr was `Pipe`.
    pub stderr: Option<File>,

    args: Vec<OsString>,
    pid: u32,
    exit_status: Option<ExitStatus>,
    detached: bool,
}

impl Popen {
    /// Spawn a child process running `argv`, configured by `config`.
    ///
    /// `argv[0]` names the program, which is looked up in `PATH` if it contains no
    /// slash. It is executed directly, without a shell. Arguments and other strings
    /// passed to the child must not contain NUL bytes.
    ///
    /// This returns an error only if the child could not be created: `argv` is
    /// empty or contains a NUL byte, or creating a pipe or forking failed. Failures
    /// that happen in the child, such as a missing program, a nonexistent working
    /// directory or a failing preexec hook, make the child exit with
    /// [`SETUP_FAILED_EXIT_CODE`](crate::SETUP_FAILED_EXIT_CODE).
    ///
    /// ```
    /// # use forkexec::*;
    /// # fn dummy() -> std::io::Result<()> {
    /// let mut p = Popen::create(&["sh", "-c", "exit 3"], PopenConfig::default())?;
    /// assert_eq!(p.wait()?.code(), Some(3));
    /// # Ok(())
    /// # }
    /// # dummy().unwrap();
    /// ```
    pub fn create(argv: &[impl AsRef<OsStr>], config: PopenConfig) -> io::Result<Popen> {
        let argv = argv.iter().map(|arg| arg.as_ref().to_owned()).collect();
        spawn::spawn(argv, config)
    }

    pub(crate) fn new(
        pid: u32,
        args: Vec<OsString>,
        (stdin, stdout, stderr): (Option<File>, Option<File>, Option<File>),
    ) -> Popen {
        Popen {
            stdin,
            stdout,
            stderr,
            args,
            pid,
            exit_status: None,
            detached: false,
        }
    }

    /// Returns the PID of the subprocess.
    ///
    /// The PID is assigned at spawn time and stays the same even after the process
    /// has been waited for, although the OS may by then have reused it.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Returns the argument list the process was started with, program first.
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Returns the exit status, if it has already been collected.
    ///
    /// This does not perform any system calls.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Mark the process as detached.
    ///
    /// A detached process is not waited for when the `Popen` is dropped.
    pub fn detach(&mut self) {
        self.detached = true;
    }

    /// Wait for the process to finish and return its exit status.
    ///
    /// Blocks the calling thread. Once the status has been collected it is cached,
    /// and later calls return it without issuing another `waitpid()`.
    ///
    /// Waiting does not read from the pipes. If the child writes more to a piped
    /// stdout or stderr than the OS pipe buffer holds, and nobody drains it, the child
    /// blocks in `write` and this call never returns. Use
    /// [`communicate`](Self::communicate) to read and wait safely.
    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        loop {
            if let Some(status) = self.exit_status {
                return Ok(status);
            }
            self.waitpid(true)?;
        }
    }

    /// Check whether the process has finished, without blocking.
    ///
    /// Returns `Some(exit_status)` if the process has finished, `None` if it is still
    /// running.
    pub fn poll(&mut self) -> io::Result<Option<ExitStatus>> {
        self.waitpid(false)?;
        Ok(self.exit_status)
    }

    /// Wait for the process to finish, timing out after the specified duration.
    ///
    /// Returns `Ok(None)` if the timeout elapsed before the process finished.
    pub fn wait_timeout(&mut self, dur: Duration) -> io::Result<Option<ExitStatus>> {
        use std::cmp::min;

        let deadline = Instant::now() + dur;
        let mut delay = Duration::from_millis(1);
        loop {
            self.waitpid(false)?;
            if let Some(status) = self.exit_status {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                debug!("pid {} still running after {:?}", self.pid, dur);
                return Ok(None);
            }
            thread::sleep(min(delay, deadline - now));
            delay = min(delay * 2, Duration::from_millis(100));
        }
    }

    fn waitpid(&mut self, block: bool) -> io::Result<()> {
        if self.exit_status.is_some() {
            return Ok(());
        }
        let flags = if block { 0 } else { posix::WNOHANG };
        match posix::waitpid(self.pid, flags) {
            Ok((pid_out, exit_status)) if pid_out == self.pid => {
                debug!("pid {} finished with {}", self.pid, exit_status);
                self.exit_status = Some(exit_status);
            }
            Ok(_) => {}
            Err(e) if e.raw_os_error() == Some(posix::ECHILD) => {
                // Someone else waited for the child. The PID no longer exists and we
                // cannot find its exit status.
                debug!("pid {} was reaped elsewhere", self.pid);
                self.exit_status = Some(ExitStatus::undetermined());
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Send the specified signal to the child process.
    ///
    /// This is a direct `kill(2)`; its errors, such as `EPERM`, are returned as-is. If
    /// the exit status has already been collected, the PID no longer belongs to the
    /// child and this fails with `ESRCH` without sending anything.
    ///
    /// Sending a terminating signal is the only way to cancel a pending
    /// [`wait`](Self::wait), which then reports the signal in its status.
    pub fn send_signal(&self, signal: i32) -> io::Result<()> {
        if self.exit_status.is_some() {
            return Err(io::Error::from_raw_os_error(posix::ESRCH));
        }
        debug!("sending signal {} to pid {}", signal, self.pid);
        posix::kill(self.pid, signal)
    }

    /// Terminate the subprocess by sending `SIGTERM`.
    pub fn terminate(&self) -> io::Result<()> {
        self.send_signal(libc::SIGTERM)
    }

    /// Kill the subprocess by sending `SIGKILL`.
    pub fn kill(&self) -> io::Result<()> {
        self.send_signal(libc::SIGKILL)
    }

    /// Feed `input_data` to the child's stdin and collect its stdout and stderr.
    ///
    /// The piped streams present in `self` are taken over and closed when this
    /// returns. Stdin is written from the calling thread while stdout and stderr are
    /// read on separate threads, so a child that produces a lot of output while still
    /// reading its input cannot deadlock. A child that exits without reading all of
    /// its input is not an error.
    ///
    /// Returns the output of each stream that was piped, `None` for the others. This
    /// does not wait for the process; call [`wait`](Self::wait) afterwards.
    pub fn communicate(
        &mut self,
        input_data: Option<&[u8]>,
    ) -> io::Result<(Option<Vec<u8>>, Option<Vec<u8>>)> {
        if input_data.is_some() && self.stdin.is_none() {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "input data given, but stdin is not piped",
            ));
        }
        let stdin = self.stdin.take();
        let stdout = self.stdout.take();
        let stderr = self.stderr.take();

        thread::scope(|scope| {
            let out_thr = stdout.map(|f| scope.spawn(move || read_all(f)));
            let err_thr = stderr.map(|f| scope.spawn(move || read_all(f)));
            if let Some(mut stdin) = stdin {
                match stdin.write_all(input_data.unwrap_or_default()) {
                    Err(e) if e.kind() != ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
            }
            let out = out_thr.map(join_reader).transpose()?;
            let err = err_thr.map(join_reader).transpose()?;
            Ok((out, err))
        })
    }
}

fn read_all(mut source: File) -> io::Result<Vec<u8>> {
    let mut contents = Vec::new();
    source.read_to_end(&mut contents)?;
    Ok(contents)
}

fn join_reader(handle: thread::ScopedJoinHandle<'_, io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("reader thread panicked")))
}

impl Drop for Popen {
    fn drop(&mut self) {
        // Close our pipe ends first so that a child blocked on reading stdin sees EOF.
        self.stdin.take();
        self.stdout.take();
        self.stderr.take();
        if !self.detached && self.exit_status.is_none() {
            let _ = self.wait();
        }
    }
}
