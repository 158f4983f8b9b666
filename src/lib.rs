//! Execution of child processes with `fork` and `exec`.
//!
//! The crate spawns an external program directly (never through a shell), and lets
//! the caller:
//!
//! * connect each of the child's standard streams to a new pipe, to an open file, or
//!   leave it inherited from the parent;
//! * run the child in a different working directory;
//! * replace the child's environment;
//! * run a hook in the child right before the program starts;
//! * wait for the child's exit status, with or without a timeout, and send it
//!   signals.
//!
//! The working directory and environment are changed only in the forked child. The
//! parent's state is never touched.
//!
//! # Examples
//!
//! Read the output of a command:
//!
//! ```
//! # use forkexec::*;
//! # use std::io::Read;
//! # fn dummy() -> std::io::Result<()> {
//! let mut p = Popen::create(&["echo", "hello"], PopenConfig {
//!     stdout: Redirection::Pipe,
//!     ..Default::default()
//! })?;
//! let mut out = String::new();
//! p.stdout.take().unwrap().read_to_string(&mut out)?;
//! assert_eq!(out, "hello\n");
//! assert!(p.wait()?.success());
//! # Ok(())
//! # }
//! # dummy().unwrap();
//! ```
//!
//! Run a command and require it to succeed:
//!
//! ```
//! # use forkexec::*;
//! check_call(&["true"], PopenConfig::default()).unwrap();
//! assert!(matches!(
//!     check_call(&["false"], PopenConfig::default()),
//!     Err(PopenError::NonZeroExit { .. })
//! ));
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms)]

#[cfg(not(unix))]
compile_error!("forkexec requires a Unix-like platform with fork and exec");

mod config;
mod error;
mod posix;
mod process;
mod run;
mod spawn;

#[cfg(test)]
mod tests;

pub use config::{PopenConfig, PreexecFn, Redirection};
pub use error::PopenError;
pub use posix::signal_from_name;
pub use process::{ExitStatus, Popen};
pub use run::{call, check_call};
pub use spawn::SETUP_FAILED_EXIT_CODE;

pub use libc::{SIGHUP, SIGINT, SIGKILL, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2};
