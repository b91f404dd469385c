use itertools::Itertools;
use std::{
    ffi::OsString,
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};

use crate::config::ToolSpec;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot run {name} ({command}): {source}")]
    Spawn {
        name: &'static str,
        command: String,
        source: std::io::Error,
    },
    #[error("{name} failed with {status} ({command})")]
    Failed {
        name: &'static str,
        command: String,
        status: ExitStatus,
    },
    #[error("io error, source {source:?}, file: {file:?}")]
    Io {
        source: std::io::Error,
        file: PathBuf,
    },
    #[error("{name} finished but did not create {file:?}")]
    MissingOutput { name: &'static str, file: PathBuf },
}

/// Runs one external program in a fixed working directory and turns any
/// unsuccessful exit into an error.
pub struct ToolRunner<'a> {
    name: &'static str,
    spec: &'a ToolSpec,
    workdir: &'a Path,
}

impl<'a> ToolRunner<'a> {
    pub fn new(name: &'static str, spec: &'a ToolSpec, workdir: &'a Path) -> Self {
        Self {
            name,
            spec,
            workdir,
        }
    }

    fn command<I, S>(&self, args: I) -> (Command, String)
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<OsString> = self
            .spec
            .args
            .iter()
            .map(OsString::from)
            .chain(args.into_iter().map(Into::into))
            .collect();
        let cmdline = std::iter::once(self.spec.program.as_str())
            .map(|s| s.to_owned())
            .chain(args.iter().map(|a| a.to_string_lossy().into_owned()))
            .join(" ");
        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&args).current_dir(self.workdir);
        (cmd, cmdline)
    }

    fn check(&self, cmdline: String, status: ExitStatus) -> Result<()> {
        if status.success() {
            log::debug!("{} finished: {}", self.name, status);
            Ok(())
        } else {
            Err(Error::Failed {
                name: self.name,
                command: cmdline,
                status,
            })
        }
    }

    fn spawn_error(&self, cmdline: String, source: std::io::Error) -> Error {
        Error::Spawn {
            name: self.name,
            command: cmdline,
            source,
        }
    }

    /// Run with inherited stdout/stderr.
    pub fn run<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let (mut cmd, cmdline) = self.command(args);
        log::debug!("running {}: {}", self.name, cmdline);
        let status = cmd
            .stdin(Stdio::null())
            .status()
            .map_err(|e| self.spawn_error(cmdline.clone(), e))?;
        self.check(cmdline, status)
    }

    /// Run with stdout redirected into `stdout_path`. The file is truncated
    /// first and removed again if the program cannot run or fails.
    pub fn run_to_file<I, S>(&self, args: I, stdout_path: &Path) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let (mut cmd, cmdline) = self.command(args);
        log::debug!(
            "running {}: {} > {}",
            self.name,
            cmdline,
            stdout_path.display()
        );
        let out = File::create(stdout_path).map_err(|e| Error::Io {
            source: e,
            file: stdout_path.to_owned(),
        })?;
        let res = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .status()
            .map_err(|e| self.spawn_error(cmdline.clone(), e))
            .and_then(|status| self.check(cmdline, status));
        if res.is_err() {
            if let Err(e) = std::fs::remove_file(stdout_path) {
                log::warn!("cannot remove {}: {}", stdout_path.display(), e);
            }
        }
        res
    }

    /// Run with `input` written to the program's stdin; used for menu
    /// driven programs. stdout is discarded.
    pub fn run_with_stdin<I, S>(&self, args: I, input: &str) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let (mut cmd, cmdline) = self.command(args);
        log::debug!("running {}: {} <<< {:?}", self.name, cmdline, input);
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| self.spawn_error(cmdline.clone(), e))?;

        if let Some(mut stdin) = child.stdin.take() {
            // a program that exits without reading its menu closes the pipe;
            // its exit status is what gets reported
            if let Err(e) = stdin.write_all(input.as_bytes()) {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(self.spawn_error(cmdline, e));
                }
            }
        }
        let status = child
            .wait()
            .map_err(|e| self.spawn_error(cmdline.clone(), e))?;
        self.check(cmdline, status)
    }

    /// Error unless `file` exists after the program returned successfully.
    pub fn expect_output(&self, file: &Path) -> Result<()> {
        if file.is_file() {
            Ok(())
        } else {
            Err(Error::MissingOutput {
                name: self.name,
                file: file.to_owned(),
            })
        }
    }
}

/// Write a `/bin/sh` script standing in for an external program.
#[cfg(all(test, unix))]
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("{body}\n")).unwrap();
    path
}

/// Run a script from [`write_script`] through `/bin/sh`; the script file
/// itself is never executed.
#[cfg(all(test, unix))]
pub(crate) fn script_spec(path: &Path) -> ToolSpec {
    ToolSpec {
        program: "/bin/sh".into(),
        args: vec![path.to_string_lossy().into_owned()],
    }
}

#[cfg(unix)]
#[test]
fn run_passes_prefix_args_and_workdir() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "echo_args.sh", r#"echo "$@" > args.txt"#);
    let mut spec = script_spec(&script);
    spec.args.push("--fixed".into());
    let runner = ToolRunner::new("echo", &spec, dir.path());
    runner.run(["a", "b"]).unwrap();
    let written = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
    assert_eq!(written.trim(), "--fixed a b");
}

#[cfg(unix)]
#[test]
fn nonzero_exit_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "fail.sh", "exit 3");
    let spec = script_spec(&script);
    let runner = ToolRunner::new("failing tool", &spec, dir.path());
    match runner.run(Vec::<String>::new()) {
        Err(Error::Failed { name, status, .. }) => {
            assert_eq!(name, "failing tool");
            assert_eq!(status.code(), Some(3));
        }
        x => panic!("unexpected result: {x:?}"),
    }
}

#[test]
fn missing_program_is_a_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let spec = ToolSpec::new("/nonexistent/snphylo-missing-tool");
    let runner = ToolRunner::new("missing", &spec, dir.path());
    assert!(matches!(
        runner.run(["x"]),
        Err(Error::Spawn { name: "missing", .. })
    ));
}

#[cfg(unix)]
#[test]
fn run_to_file_captures_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "cat.sh", r#"cat "$1""#);
    std::fs::write(dir.path().join("in.txt"), "a\nb\n").unwrap();
    let spec = script_spec(&script);
    let runner = ToolRunner::new("cat", &spec, dir.path());
    let out = dir.path().join("out.txt");
    runner.run_to_file(["in.txt"], &out).unwrap();
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "a\nb\n");
    runner.expect_output(&out).unwrap();
    assert!(matches!(
        runner.expect_output(&dir.path().join("nope.txt")),
        Err(Error::MissingOutput { .. })
    ));
}

#[cfg(unix)]
#[test]
fn failed_run_to_file_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "half.sh", "echo partial\nexit 2");
    let spec = script_spec(&script);
    let runner = ToolRunner::new("half", &spec, dir.path());
    let out = dir.path().join("out.txt");
    assert!(matches!(
        runner.run_to_file(Vec::<String>::new(), &out),
        Err(Error::Failed { .. })
    ));
    assert!(!out.exists());

    let spec = ToolSpec::new("/nonexistent/snphylo-missing-tool");
    let runner = ToolRunner::new("missing", &spec, dir.path());
    assert!(matches!(
        runner.run_to_file(Vec::<String>::new(), &out),
        Err(Error::Spawn { .. })
    ));
    assert!(!out.exists());
}

#[cfg(unix)]
#[test]
fn run_with_stdin_feeds_input() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "menu.sh", "cat > menu.txt");
    let spec = script_spec(&script);
    let runner = ToolRunner::new("menu", &spec, dir.path());
    runner
        .run_with_stdin(Vec::<String>::new(), "infile\nY\n")
        .unwrap();
    let written = std::fs::read_to_string(dir.path().join("menu.txt")).unwrap();
    assert_eq!(written, "infile\nY\n");
}
