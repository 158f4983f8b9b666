use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Instruction what to do with a standard stream of the child process.
///
/// Exactly one of the three applies to each of stdin, stdout and stderr.
#[derive(Debug, Default)]
pub enum Redirection {
    /// Do nothing with the stream.
    ///
    /// The child inherits the stream from the parent. The corresponding field of
    /// [`Popen`](crate::Popen) will be `None`.
    #[default]
    None,

    /// Redirect the stream to a newly created pipe.
    ///
    /// One end of the pipe becomes the child's standard stream, and the other end is
    /// exposed to the parent in the corresponding field of [`Popen`](crate::Popen):
    /// writable for stdin, readable for stdout and stderr.
    Pipe,

    /// Redirect the stream to the specified open `File`.
    ///
    /// This does not create a pipe, it simply spawns the child so that the specified
    /// stream refers to that file. The parent's copy of the file is closed once the
    /// child has been started.
    File(File),
}

impl From<File> for Redirection {
    fn from(f: File) -> Redirection {
        Redirection::File(f)
    }
}

/// Hook run in the child after the working directory and environment have been set
/// up, just before the program is executed.
///
/// It receives the child's resolved (absolute) working directory. It runs in the
/// forked child, so its side effects are confined to the child, and an error or a
/// panic makes the child exit with
/// [`SETUP_FAILED_EXIT_CODE`](crate::SETUP_FAILED_EXIT_CODE) instead of running the
/// program.
///
/// The hook runs between `fork` and `exec` of a possibly multi-threaded parent: it
/// should avoid taking locks that other threads of the parent might have held at the
/// time of the fork.
pub type PreexecFn = Box<dyn FnOnce(&Path) -> io::Result<()> + Send>;

/// Options for [`Popen::create`](crate::Popen::create).
///
/// Construct it using struct-update syntax:
///
/// ```
/// # use forkexec::*;
/// let config = PopenConfig {
///     stdout: Redirection::Pipe,
///     cwd: Some("/".into()),
///     ..Default::default()
/// };
/// ```
#[derive(Default)]
pub struct PopenConfig {
    /// How to configure the child's standard input.
    pub stdin: Redirection,
    /// How to configure the child's standard output.
    pub stdout: Redirection,
    /// How to configure the child's standard error.
    pub stderr: Redirection,

    /// Working directory of the child, relative paths being resolved against the
    /// parent's working directory. The parent's own directory is never changed.
    pub cwd: Option<PathBuf>,

    /// Environment of the child.
    ///
    /// When `None`, the environment is inherited. When set, it *replaces* the child's
    /// environment as a whole: variables not listed are absent in the child. If a key
    /// occurs more than once, the last value wins.
    pub env: Option<Vec<(OsString, OsString)>>,

    /// Hook to run in the child just before the program is executed.
    pub preexec: Option<PreexecFn>,
}

impl PopenConfig {
    /// Build an environment list from key-value pairs, for use in the `env` field.
    ///
    /// ```
    /// # use forkexec::*;
    /// let config = PopenConfig {
    ///     env: Some(PopenConfig::make_env([("LANG", "C")])),
    ///     ..Default::default()
    /// };
    /// ```
    pub fn make_env(
        vars: impl IntoIterator<Item = (impl AsRef<OsStr>, impl AsRef<OsStr>)>,
    ) -> Vec<(OsString, OsString)> {
        vars.into_iter()
            .map(|(k, v)| (k.as_ref().to_owned(), v.as_ref().to_owned()))
            .collect()
    }

    /// Returns a copy of the parent's environment, for modifying and passing as
    /// `env` when the child should see the parent's variables plus some changes.
    pub fn current_env() -> Vec<(OsString, OsString)> {
        std::env::vars_os().collect()
    }
}

impl fmt::Debug for PopenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopenConfig")
            .field("stdin", &self.stdin)
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .field("cwd", &self.cwd)
            .field("env", &self.env)
            .field("preexec", &self.preexec.as_ref().map(|_| ".."))
            .finish()
    }
}
