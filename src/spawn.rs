use std::collections::HashSet;
use std::convert::Infallible;
use std::ffi::{CString, OsStr, OsString};
use std::fs::File;
use std::io::{self, ErrorKind};
use std::os::unix::io::AsRawFd;
use std::panic::{self, AssertUnwindSafe};

use tracing::debug;

use crate::config::{PopenConfig, PreexecFn, Redirection};
use crate::posix::{self, CVec};
use crate::process::Popen;

/// Exit code of a child that failed before its program could start.
///
/// Failures of stream setup, of changing into the working directory, of the preexec
/// hook and of `exec` itself all happen in the child, and are reported to the parent
/// only through this exit code.
pub const SETUP_FAILED_EXIT_CODE: u8 = 127;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum StandardStream {
    Input = 0,
    Output = 1,
    Error = 2,
}

impl StandardStream {
    fn fd(self) -> i32 {
        self as i32
    }

    /// Output and error are written by the child, input by the parent.
    fn child_writes(self) -> bool {
        !matches!(self, StandardStream::Input)
    }
}

/// Create the pipe for a stream, if one was requested.
///
/// Returns `(parent_end, child_end)`: the parent keeps the end it writes to (stdin)
/// or reads from (stdout, stderr), and the child gets the opposite end. Returns `None`
/// for `Redirection::None` and `Redirection::File`, which need no pipe.
pub(crate) fn provision(
    which: StandardStream,
    redirection: &Redirection,
) -> io::Result<Option<(File, File)>> {
    match redirection {
        Redirection::Pipe => {
            let (read, write) = posix::pipe()?;
            Ok(Some(if which.child_writes() {
                (read, write)
            } else {
                (write, read)
            }))
        }
        Redirection::None | Redirection::File(_) => Ok(None),
    }
}

/// Setup of one standard stream, carried across the fork.
#[derive(Debug)]
struct StreamSetup {
    which: StandardStream,
    // Exposed to the caller; closed in the child.
    parent_end: Option<File>,
    // Pipe end or redirection target; bound to `which` in the child, closed in the
    // parent.
    child_end: Option<File>,
}

impl StreamSetup {
    fn new(which: StandardStream, redirection: Redirection) -> io::Result<StreamSetup> {
        let (parent_end, child_end) = match provision(which, &redirection)? {
            Some((parent_end, child_end)) => (Some(parent_end), Some(child_end)),
            None => match redirection {
                Redirection::File(f) => (None, Some(f)),
                _ => (None, None),
            },
        };
        Ok(StreamSetup {
            which,
            parent_end,
            child_end,
        })
    }

    /// Move the child end off the standard descriptors, unless it already sits on
    /// its own target, so that binding another stream cannot overwrite it.
    fn lift_child_end(&mut self) -> io::Result<()> {
        if let Some(end) = &self.child_end {
            let fd = end.as_raw_fd();
            if fd <= 2 && fd != self.which.fd() {
                self.child_end = Some(posix::dup_above_std(fd)?);
            }
        }
        Ok(())
    }

    /// Bind the child end to the standard descriptor. The original stays open; it is
    /// close-on-exec unless it already was the target.
    fn bind_in_child(&mut self) -> io::Result<()> {
        let Some(end) = &self.child_end else {
            return Ok(());
        };
        let (fd, target) = (end.as_raw_fd(), self.which.fd());
        if fd == target {
            posix::set_inheritable(fd, true)?;
            if let Some(end) = self.child_end.take() {
                std::mem::forget(end);
            }
        } else {
            posix::dup2(fd, target)?;
        }
        Ok(())
    }

    fn keep_parent_end(self) -> Option<File> {
        self.parent_end
    }
}

/// Everything the child needs after fork, prepared in advance so that the child does
/// not have to allocate before running the hook.
struct ChildPlan<E> {
    streams: [StreamSetup; 3],
    cwd: Option<CString>,
    env: Option<CVec>,
    preexec: Option<PreexecFn>,
    cwd_buf: Vec<u8>,
    exec: E,
}

impl<E: FnOnce() -> io::Error> ChildPlan<E> {
    fn run(mut self) -> io::Result<Infallible> {
        posix::reset_sigpipe()?;
        // Nothing may be closed once the first dup2 has filled a standard slot, so the
        // parent ends go first. An open copy of them in the child would keep the
        // sibling side from ever seeing EOF.
        for stream in &mut self.streams {
            stream.parent_end.take();
        }
        for stream in &mut self.streams {
            stream.lift_child_end()?;
        }
        for stream in &mut self.streams {
            stream.bind_in_child()?;
        }
        if let Some(dir) = &self.cwd {
            posix::chdir(dir)?;
        }
        if let Some(env) = &self.env {
            // The child is single-threaded, and `env` stays alive until exec.
            unsafe { posix::install_environ(env) };
        }
        if let Some(preexec) = self.preexec.take() {
            preexec(posix::getcwd(&mut self.cwd_buf)?)?;
        }
        Err((self.exec)())
    }
}

/// Spawn a subprocess.
///
/// Creates the requested pipes, forks, sets up the child and execs the program in
/// it, and returns the `Popen` handle holding the parent's pipe ends. Only failures
/// that happen in the parent (invalid arguments, pipe or fork failing) are returned
/// as errors; failures in the child show up in its exit status.
pub(crate) fn spawn(argv: Vec<OsString>, config: PopenConfig) -> io::Result<Popen> {
    if argv.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "argv must not be empty",
        ));
    }
    let PopenConfig {
        stdin,
        stdout,
        stderr,
        cwd,
        env,
        preexec,
    } = config;

    let exec = posix::prep_exec(&argv)?;
    let cwd = cwd
        .as_deref()
        .map(|d| posix::os_to_cstring(d.as_os_str()))
        .transpose()?;
    let env = env
        .as_deref()
        .map(|env| CVec::new(&format_env(env)))
        .transpose()?;
    let cwd_buf = if preexec.is_some() {
        vec![0u8; posix::CWD_BUF_LEN]
    } else {
        vec![]
    };

    let plan = ChildPlan {
        streams: [
            StreamSetup::new(StandardStream::Input, stdin)?,
            StreamSetup::new(StandardStream::Output, stdout)?,
            StreamSetup::new(StandardStream::Error, stderr)?,
        ],
        cwd,
        env,
        preexec,
        cwd_buf,
        exec,
    };

    let pid = match unsafe { posix::fork()? } {
        Some(pid) => pid,
        None => {
            let _ = panic::catch_unwind(AssertUnwindSafe(|| plan.run()));
            posix::_exit(SETUP_FAILED_EXIT_CODE);
        }
    };

    // The child ends are dropped here, so the parent keeps only the exposed ends.
    let [stdin, stdout, stderr] = plan.streams.map(StreamSetup::keep_parent_end);
    debug!("spawned pid {} running {:?}", pid, argv);
    Ok(Popen::new(pid, argv, (stdin, stdout, stderr)))
}

fn format_env(env: &[(OsString, OsString)]) -> Vec<OsString> {
    let mut seen = HashSet::<&OsStr>::new();
    let mut formatted: Vec<_> = env
        .iter()
        .rev()
        .filter(|&(k, _)| seen.insert(k))
        .map(|(k, v)| {
            let mut fmt = k.clone();
            fmt.push("=");
            fmt.push(v);
            fmt
        })
        .collect();
    formatted.reverse();
    formatted
}
