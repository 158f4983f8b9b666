use std::ffi::{CStr, CString, OsStr};
use std::fs::File;
use std::io::{Error, ErrorKind, Result};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::Path;
use std::{iter, mem, ptr};

use crate::process::ExitStatus;

pub use libc::{ECHILD, ESRCH};

unsafe extern "C" {
    static mut environ: *const *const libc::c_char;
}

fn check_err<T: Ord + Default>(num: T) -> Result<T> {
    if num < T::default() {
        return Err(Error::last_os_error());
    }
    Ok(num)
}

/// Create a pipe, returning `(read_end, write_end)`.
///
/// Both ends are close-on-exec. The end that ends up in a child is made inheritable
/// by `dup2` onto the standard stream slot.
pub fn pipe() -> Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];
    check_err(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    let (read, write) = unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };
    set_inheritable(read.as_raw_fd(), false)?;
    set_inheritable(write.as_raw_fd(), false)?;
    Ok((read, write))
}

/// Fork the current process.
///
/// Returns `Some(child_pid)` in the parent and `None` in the child.
///
/// # Safety
///
/// The child of a multi-threaded parent may only call async-signal-safe functions
/// until it execs.
pub unsafe fn fork() -> Result<Option<u32>> {
    let pid = check_err(unsafe { libc::fork() })?;
    if pid == 0 {
        Ok(None)
    } else {
        Ok(Some(pid as u32))
    }
}

pub fn os_to_cstring(s: &OsStr) -> Result<CString> {
    CString::new(s.as_bytes()).map_err(|_| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("nul byte in {:?}", s),
        )
    })
}

/// Null-terminated vector of C strings, built before fork so the child does not
/// allocate.
#[derive(Debug)]
pub struct CVec {
    // Pointed to by elements of `ptrs`.
    #[allow(dead_code)]
    strings: Vec<CString>,
    ptrs: Vec<*const libc::c_char>,
}

// The raw pointers only point into `strings`, which is owned by the same value.
unsafe impl Send for CVec {}
unsafe impl Sync for CVec {}

impl CVec {
    pub fn new(slice: &[impl AsRef<OsStr>]) -> Result<CVec> {
        let strings = slice
            .iter()
            .map(|x| os_to_cstring(x.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let ptrs = strings
            .iter()
            .map(|s| s.as_ptr())
            .chain(iter::once(ptr::null()))
            .collect();
        Ok(CVec { strings, ptrs })
    }

    pub fn as_c_vec(&self) -> *const *const libc::c_char {
        self.ptrs.as_ptr()
    }
}

/// Prepare everything `execvp` needs, so that the returned closure can run in the
/// child without allocating. The closure only returns if exec failed.
pub fn prep_exec<T: AsRef<OsStr>>(argv: &[T]) -> Result<impl FnOnce() -> Error + use<T>> {
    let cmd = os_to_cstring(argv[0].as_ref())?;
    let args = CVec::new(argv)?;
    Ok(move || {
        unsafe {
            libc::execvp(cmd.as_ptr(), args.as_c_vec());
        }
        Error::last_os_error()
    })
}

/// Replace the process environment with `env`.
///
/// # Safety
///
/// Must only be called in a single-threaded process (the child after fork), and `env`
/// must outlive every later environment lookup, which holds when the process execs or
/// exits while `env` is still borrowed.
pub unsafe fn install_environ(env: &CVec) {
    unsafe {
        environ = env.as_c_vec();
    }
}

pub fn chdir(dir: &CStr) -> Result<()> {
    check_err(unsafe { libc::chdir(dir.as_ptr()) })?;
    Ok(())
}

/// Size of the buffer handed to `getcwd`.
pub const CWD_BUF_LEN: usize = libc::PATH_MAX as usize;

/// Write the current directory into `buf` and return it as a path borrowed from it.
pub fn getcwd(buf: &mut [u8]) -> Result<&Path> {
    let ret = unsafe { libc::getcwd(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret.is_null() {
        return Err(Error::last_os_error());
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(Path::new(OsStr::from_bytes(&buf[..len])))
}

pub fn _exit(status: u8) -> ! {
    unsafe { libc::_exit(status as libc::c_int) }
}

pub const WNOHANG: i32 = libc::WNOHANG;

pub fn waitpid(pid: u32, flags: i32) -> Result<(u32, ExitStatus)> {
    let mut status = 0 as libc::c_int;
    loop {
        let ret = unsafe { libc::waitpid(pid as libc::pid_t, &mut status, flags) };
        match check_err(ret) {
            Ok(pid_out) => return Ok((pid_out as u32, ExitStatus::from_raw(status))),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

pub fn kill(pid: u32, signal: i32) -> Result<()> {
    check_err(unsafe { libc::kill(pid as libc::pid_t, signal) })?;
    Ok(())
}

pub fn fcntl(fd: RawFd, cmd: i32, arg1: Option<i32>) -> Result<i32> {
    check_err(unsafe {
        match arg1 {
            Some(arg1) => libc::fcntl(fd, cmd, arg1),
            None => libc::fcntl(fd, cmd),
        }
    })
}

pub fn set_inheritable(fd: RawFd, inheritable: bool) -> Result<()> {
    let old = fcntl(fd, libc::F_GETFD, None)?;
    let new = if inheritable {
        old & !libc::FD_CLOEXEC
    } else {
        old | libc::FD_CLOEXEC
    };
    if new != old {
        fcntl(fd, libc::F_SETFD, Some(new))?;
    }
    Ok(())
}

pub fn dup2(oldfd: RawFd, newfd: RawFd) -> Result<()> {
    check_err(unsafe { libc::dup2(oldfd, newfd) })?;
    Ok(())
}

/// Duplicate `fd` onto the lowest free descriptor above the standard streams, with
/// close-on-exec set.
pub fn dup_above_std(fd: RawFd) -> Result<File> {
    let new = fcntl(fd, libc::F_DUPFD_CLOEXEC, Some(3))?;
    Ok(unsafe { File::from_raw_fd(new) })
}

pub fn reset_sigpipe() -> Result<()> {
    // libstd ignores SIGPIPE, and the child inherits ignored signals and the signal
    // mask. Most programs expect the defaults, so restore them before exec.
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        check_err(libc::sigemptyset(&mut set))?;
        let ret = libc::pthread_sigmask(libc::SIG_SETMASK, &set, ptr::null_mut());
        if ret != 0 {
            return Err(Error::from_raw_os_error(ret));
        }
        if libc::signal(libc::SIGPIPE, libc::SIG_DFL) == libc::SIG_ERR {
            return Err(Error::last_os_error());
        }
    }
    Ok(())
}

const SIGNAL_NAMES: &[(&str, i32)] = &[
    ("HUP", libc::SIGHUP),
    ("INT", libc::SIGINT),
    ("QUIT", libc::SIGQUIT),
    ("ABRT", libc::SIGABRT),
    ("KILL", libc::SIGKILL),
    ("USR1", libc::SIGUSR1),
    ("USR2", libc::SIGUSR2),
    ("PIPE", libc::SIGPIPE),
    ("ALRM", libc::SIGALRM),
    ("TERM", libc::SIGTERM),
    ("CHLD", libc::SIGCHLD),
    ("CONT", libc::SIGCONT),
    ("STOP", libc::SIGSTOP),
    ("TSTP", libc::SIGTSTP),
    ("WINCH", libc::SIGWINCH),
];

/// Look up a signal number by name.
///
/// Accepts the bare name (`"TERM"`), the prefixed name (`"SIGTERM"`), or a decimal
/// signal number (`"15"`). Names are case-sensitive, as in `kill(1)`.
pub fn signal_from_name(name: &str) -> Option<i32> {
    if let Ok(num) = name.parse::<i32>() {
        return (num > 0).then_some(num);
    }
    let bare = name.strip_prefix("SIG").unwrap_or(name);
    SIGNAL_NAMES
        .iter()
        .find(|&&(n, _)| n == bare)
        .map(|&(_, num)| num)
}
