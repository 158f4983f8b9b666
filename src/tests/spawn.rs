use std::env;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::spawn::{StandardStream, provision};
use crate::tests::read_whole_file;
use crate::{Popen, PopenConfig, Redirection, SETUP_FAILED_EXIT_CODE};

#[test]
fn good_cmd() {
    let mut p = Popen::create(&["true"], PopenConfig::default()).unwrap();
    assert!(p.wait().unwrap().success());
}

#[test]
fn err_exit() {
    let mut p = Popen::create(&["sh", "-c", "exit 13"], PopenConfig::default()).unwrap();
    let status = p.wait().unwrap();
    assert_eq!(status.code(), Some(13));
    assert!(!status.success());
}

#[test]
fn bad_cmd_fails_in_child() {
    let mut p = Popen::create(&["nosuchcommand-forkexec"], PopenConfig::default()).unwrap();
    assert_eq!(
        p.wait().unwrap().code(),
        Some(SETUP_FAILED_EXIT_CODE as u32)
    );
}

#[test]
fn reject_empty_argv() {
    let test = Popen::create(&[""; 0], PopenConfig::default());
    assert!(
        matches!(&test, Err(e) if e.kind() == io::ErrorKind::InvalidInput),
        "didn't get InvalidInput for empty argv"
    );
}

#[test]
fn null_byte_in_cmd() {
    let result = Popen::create(&["echo\0foo"], PopenConfig::default());
    assert!(matches!(&result, Err(e) if e.kind() == io::ErrorKind::InvalidInput));
}

#[test]
fn null_byte_in_env() {
    let result = Popen::create(
        &["true"],
        PopenConfig {
            env: Some(PopenConfig::make_env([("FOO", "a\0b")])),
            ..Default::default()
        },
    );
    assert!(matches!(&result, Err(e) if e.kind() == io::ErrorKind::InvalidInput));
}

#[test]
fn provision_output_pipe_orientation() {
    let (mut parent_end, mut child_end) =
        provision(StandardStream::Output, &Redirection::Pipe)
            .unwrap()
            .unwrap();
    child_end.write_all(b"from child").unwrap();
    drop(child_end);
    assert_eq!(read_whole_file(&mut parent_end), "from child");
}

#[test]
fn provision_input_pipe_orientation() {
    let (mut parent_end, child_end) = provision(StandardStream::Input, &Redirection::Pipe)
        .unwrap()
        .unwrap();
    parent_end.write_all(b"from parent").unwrap();
    drop(parent_end);
    assert_eq!(read_whole_file(child_end), "from parent");
}

#[test]
fn provision_without_pipe() {
    let tmpdir = TempDir::new().unwrap();
    let file = File::create(tmpdir.path().join("out")).unwrap();
    assert!(
        provision(StandardStream::Error, &Redirection::None)
            .unwrap()
            .is_none()
    );
    assert!(
        provision(StandardStream::Output, &Redirection::File(file))
            .unwrap()
            .is_none()
    );
}

#[test]
fn read_from_stdout() {
    let mut p = Popen::create(
        &["echo", "foo"],
        PopenConfig {
            stdout: Redirection::Pipe,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(p.stdin.is_none() && p.stderr.is_none());
    assert_eq!(read_whole_file(p.stdout.take().unwrap()), "foo\n");
    assert!(p.wait().unwrap().success());
}

#[test]
fn read_from_stderr() {
    let mut p = Popen::create(
        &["sh", "-c", "printf foo; printf bar >&2"],
        PopenConfig {
            stdout: Redirection::Pipe,
            stderr: Redirection::Pipe,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(read_whole_file(p.stderr.take().unwrap()), "bar");
    assert_eq!(read_whole_file(p.stdout.take().unwrap()), "foo");
    assert!(p.wait().unwrap().success());
}

#[test]
fn write_to_stdin() {
    let mut p = Popen::create(
        &["cat"],
        PopenConfig {
            stdin: Redirection::Pipe,
            stdout: Redirection::Pipe,
            ..Default::default()
        },
    )
    .unwrap();
    p.stdin.take().unwrap().write_all(b"foo\0bar\n").unwrap();
    // cat only exits once it sees EOF, which requires that no copy of the write
    // end survives anywhere but in the handle we just dropped.
    let mut out = vec![];
    p.stdout.take().unwrap().read_to_end(&mut out).unwrap();
    assert_eq!(out, b"foo\0bar\n");
    assert!(p.wait().unwrap().success());
}

#[test]
fn stdout_eof_while_child_lives_on() {
    // The child closes its stdout and keeps running; the reader must still see EOF.
    let mut p = Popen::create(
        &["sh", "-c", "printf foo; exec >&-; sleep 0.2"],
        PopenConfig {
            stdout: Redirection::Pipe,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(read_whole_file(p.stdout.take().unwrap()), "foo");
    assert!(p.wait().unwrap().success());
}

#[test]
fn input_from_file() {
    let tmpdir = TempDir::new().unwrap();
    let tmpname = tmpdir.path().join("input");
    fs::write(&tmpname, b"foo").unwrap();
    let mut p = Popen::create(
        &["cat"],
        PopenConfig {
            stdin: Redirection::File(File::open(&tmpname).unwrap()),
            stdout: Redirection::Pipe,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(p.stdin.is_none());
    assert_eq!(read_whole_file(p.stdout.take().unwrap()), "foo");
    assert!(p.wait().unwrap().success());
}

#[test]
fn output_to_file() {
    let tmpdir = TempDir::new().unwrap();
    let tmpname = tmpdir.path().join("output");
    let outfile = File::create(&tmpname).unwrap();
    let mut p = Popen::create(
        &["printf", "foo"],
        PopenConfig {
            stdout: outfile.into(),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(p.stdout.is_none());
    assert!(p.wait().unwrap().success());
    assert_eq!(fs::read_to_string(&tmpname).unwrap(), "foo");
}

#[test]
fn stderr_to_file() {
    let tmpdir = TempDir::new().unwrap();
    let tmpname = tmpdir.path().join("errors");
    let mut p = Popen::create(
        &["sh", "-c", "printf oops >&2"],
        PopenConfig {
            stderr: Redirection::File(File::create(&tmpname).unwrap()),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(p.wait().unwrap().success());
    assert_eq!(fs::read_to_string(&tmpname).unwrap(), "oops");
}

fn canonical(path: impl Into<PathBuf>) -> String {
    fs::canonicalize(path.into())
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned()
}

#[test]
fn cwd_absolute() {
    let tmpdir = TempDir::new().unwrap();
    let parent_cwd = env::current_dir().unwrap();
    let mut p = Popen::create(
        &["sh", "-c", "pwd -P"],
        PopenConfig {
            stdout: Redirection::Pipe,
            cwd: Some(tmpdir.path().to_owned()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(env::current_dir().unwrap(), parent_cwd);
    let out = read_whole_file(p.stdout.take().unwrap());
    assert_eq!(out.trim_end(), canonical(tmpdir.path()));
    assert!(p.wait().unwrap().success());
}

#[test]
fn cwd_relative_to_parent() {
    let mut p = Popen::create(
        &["sh", "-c", "pwd -P"],
        PopenConfig {
            stdout: Redirection::Pipe,
            cwd: Some("src".into()),
            ..Default::default()
        },
    )
    .unwrap();
    let out = read_whole_file(p.stdout.take().unwrap());
    assert_eq!(out.trim_end(), canonical(env::current_dir().unwrap().join("src")));
    assert!(p.wait().unwrap().success());
}

#[test]
fn bad_cwd_fails_in_child() {
    let tmpdir = TempDir::new().unwrap();
    let mut p = Popen::create(
        &["true"],
        PopenConfig {
            cwd: Some(tmpdir.path().join("missing")),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(
        p.wait().unwrap().code(),
        Some(SETUP_FAILED_EXIT_CODE as u32)
    );
}

#[test]
fn env_replaces_everything() {
    let mut p = Popen::create(
        &["env"],
        PopenConfig {
            stdout: Redirection::Pipe,
            env: Some(PopenConfig::make_env([("NAME", "value")])),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(read_whole_file(p.stdout.take().unwrap()), "NAME=value\n");
    assert!(p.wait().unwrap().success());
}

#[test]
fn env_empty() {
    let mut p = Popen::create(
        &["env"],
        PopenConfig {
            stdout: Redirection::Pipe,
            env: Some(vec![]),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(read_whole_file(p.stdout.take().unwrap()), "");
    assert!(p.wait().unwrap().success());
}

#[test]
fn env_last_duplicate_wins() {
    let mut p = Popen::create(
        &["env"],
        PopenConfig {
            stdout: Redirection::Pipe,
            env: Some(PopenConfig::make_env([("A", "1"), ("B", "2"), ("A", "3")])),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(read_whole_file(p.stdout.take().unwrap()), "B=2\nA=3\n");
    assert!(p.wait().unwrap().success());
}

#[test]
fn env_inherited_by_default() {
    let path = env::var_os("PATH").unwrap_or_default();
    let mut p = Popen::create(
        &["sh", "-c", r#"printf %s "$PATH""#],
        PopenConfig {
            stdout: Redirection::Pipe,
            ..Default::default()
        },
    )
    .unwrap();
    let out = read_whole_file(p.stdout.take().unwrap());
    assert_eq!(OsString::from(out), path);
    assert!(p.wait().unwrap().success());
}

#[test]
fn preexec_sees_cwd_and_env() {
    let tmpdir = TempDir::new().unwrap();
    let expected_dir = fs::canonicalize(tmpdir.path()).unwrap();
    let mut p = Popen::create(
        &["true"],
        PopenConfig {
            cwd: Some(tmpdir.path().to_owned()),
            env: Some(PopenConfig::make_env([("NAME", "value")])),
            preexec: Some(Box::new(move |dir: &Path| -> io::Result<()> {
                let ok = dir == expected_dir.as_path()
                    && env::var_os("NAME").as_deref() == Some(OsStr::new("value"))
                    && env::var_os("PATH").is_none();
                if ok {
                    Ok(())
                } else {
                    Err(io::Error::other("preexec saw the parent's state"))
                }
            })),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(p.wait().unwrap().success());
}

#[test]
fn preexec_runs_before_program() {
    let tmpdir = TempDir::new().unwrap();
    let mut p = Popen::create(
        &["cat", "marker"],
        PopenConfig {
            stdout: Redirection::Pipe,
            cwd: Some(tmpdir.path().to_owned()),
            preexec: Some(Box::new(|_dir: &Path| fs::write("marker", b"hooked"))),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(read_whole_file(p.stdout.take().unwrap()), "hooked");
    assert!(p.wait().unwrap().success());
    assert!(!env::current_dir().unwrap().join("marker").exists());
}

#[test]
fn preexec_error_fails_child() {
    let mut p = Popen::create(
        &["true"],
        PopenConfig {
            preexec: Some(Box::new(|_dir: &Path| -> io::Result<()> {
                Err(io::Error::other("no"))
            })),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(
        p.wait().unwrap().code(),
        Some(SETUP_FAILED_EXIT_CODE as u32)
    );
}

#[test]
fn preexec_panic_fails_child() {
    let mut p = Popen::create(
        &["true"],
        PopenConfig {
            stderr: Redirection::Pipe,
            preexec: Some(Box::new(|_dir: &Path| -> io::Result<()> {
                panic!("hook panicked")
            })),
            ..Default::default()
        },
    )
    .unwrap();
    read_whole_file(p.stderr.take().unwrap());
    assert_eq!(
        p.wait().unwrap().code(),
        Some(SETUP_FAILED_EXIT_CODE as u32)
    );
}

#[test]
fn preexec_may_capture_non_sync_state() {
    let counter = std::cell::Cell::new(0);
    let mut p = Popen::create(
        &["true"],
        PopenConfig {
            preexec: Some(Box::new(move |_dir: &Path| -> io::Result<()> {
                counter.set(counter.get() + 1);
                Ok(())
            })),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(p.wait().unwrap().success());
}

// Runs `f` in a forked copy of the test process, so that it can close standard
// descriptors without disturbing tests running in other threads.
fn in_forked_process(f: impl FnOnce() -> bool) -> bool {
    match unsafe { crate::posix::fork() }.unwrap() {
        None => {
            let ok = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or(false);
            crate::posix::_exit(if ok { 0 } else { 1 });
        }
        Some(pid) => {
            let (_, status) = crate::posix::waitpid(pid, 0).unwrap();
            status.success()
        }
    }
}

#[test]
fn stdin_bound_while_parent_stdin_closed() {
    // With fd 0 free, the read end of the stdout pipe lands on it and must not be
    // closed over the freshly bound stdin.
    let tmpdir = TempDir::new().unwrap();
    let tmpname = tmpdir.path().join("input");
    fs::write(&tmpname, b"data").unwrap();
    let input = File::open(&tmpname).unwrap();
    assert!(in_forked_process(move || {
        unsafe { libc::close(0) };
        let mut p = Popen::create(
            &["cat"],
            PopenConfig {
                stdin: Redirection::File(input),
                stdout: Redirection::Pipe,
                ..Default::default()
            },
        )
        .unwrap();
        let out = read_whole_file(p.stdout.take().unwrap());
        out == "data" && p.wait().unwrap().success()
    }));
}

#[test]
fn redirection_file_on_other_standard_fd() {
    // The output file takes fd 0, which binding stdin overwrites.
    let tmpdir = TempDir::new().unwrap();
    let inname = tmpdir.path().join("input");
    let outname = tmpdir.path().join("output");
    fs::write(&inname, b"data").unwrap();
    let input = File::open(&inname).unwrap();
    let child_outname = outname.clone();
    assert!(in_forked_process(move || {
        unsafe { libc::close(0) };
        let output = File::create(&child_outname).unwrap();
        if output.as_raw_fd() != 0 {
            return false;
        }
        let mut p = Popen::create(
            &["cat"],
            PopenConfig {
                stdin: Redirection::File(input),
                stdout: Redirection::File(output),
                ..Default::default()
            },
        )
        .unwrap();
        p.wait().unwrap().success()
    }));
    assert_eq!(fs::read_to_string(&outname).unwrap(), "data");
}
