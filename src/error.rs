use std::ffi::OsString;
use std::io;

use thiserror::Error;

use crate::process::ExitStatus;

/// Error returned by [`check_call`](crate::check_call).
#[derive(Debug, Error)]
pub enum PopenError {
    /// Spawning or waiting failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The command ran, but did not exit with code 0.
    #[error("command `{}` failed: {}", cmdline_lossy(.args), .status)]
    NonZeroExit {
        /// Arguments the command was started with, program first.
        args: Vec<OsString>,
        /// The exit status it finished with.
        status: ExitStatus,
    },
}

fn cmdline_lossy(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}
