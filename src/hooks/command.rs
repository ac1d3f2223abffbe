// src/hooks/command.rs

//! External command invocation
//!
//! Every manifest command (hooks, migrations, health checks, environment
//! checks, conditional probes) is spawned through [`ExternalCommand`]:
//!
//! - Manifest strings run through `/bin/sh -c`, so pipelines and redirects
//!   written by release authors keep working. This gives the manifest full
//!   shell power on the host; only install manifests from trusted sources.
//! - stdin is null so a command waiting for input cannot hang the pipeline
//! - The child leads its own process group; on timeout the whole group is
//!   killed with SIGKILL and reaped, so nothing is left running
//! - stdout/stderr go to temp files rather than pipes, which keeps a chatty
//!   child from blocking on a full pipe while we wait on it

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Shell used for manifest command strings
pub const SHELL: &str = "/bin/sh";

/// A fully described child process invocation
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

/// How a finished invocation ended
#[derive(Debug)]
pub struct CommandOutcome {
    /// `None` when the command was killed for exceeding its timeout
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }

    pub fn timed_out(&self) -> bool {
        self.status.is_none()
    }

    /// Exit code, or `None` for a timeout or a signal death
    pub fn code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }

    /// Log captured output, stdout at info and stderr at warn
    pub fn relay(&self, label: &str) {
        for line in self.stdout.lines().filter(|l| !l.trim().is_empty()) {
            info!("[{}] {}", label, line);
        }
        for line in self.stderr.lines().filter(|l| !l.trim().is_empty()) {
            warn!("[{}] {}", label, line);
        }
    }
}

impl ExternalCommand {
    /// Run `script` through the shell
    pub fn shell(script: &str, timeout: Duration) -> Self {
        Self {
            program: PathBuf::from(SHELL),
            args: vec!["-c".to_string(), script.to_string()],
            timeout,
            cwd: None,
            env: Vec::new(),
        }
    }

    /// Run a program directly with the given arguments
    pub fn program(program: impl Into<PathBuf>, args: &[&str], timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout,
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Spawn, wait up to the timeout and collect output
    ///
    /// Only failure to spawn or wait is an error; a non-zero exit or a
    /// timeout is reported through the outcome.
    pub fn run(&self) -> io::Result<CommandOutcome> {
        let mut stdout = tempfile::tempfile()?;
        let mut stderr = tempfile::tempfile()?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(stdout.try_clone()?)
            .stderr(stderr.try_clone()?)
            .process_group(0);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }

        debug!("Spawning {} {:?} (timeout {:?})", self.program.display(), self.args, self.timeout);
        let started = Instant::now();
        let mut child = command.spawn()?;

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => Some(status),
            None => {
                let pgid = Pid::from_raw(child.id() as i32);
                if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                    debug!("killpg({}) failed: {}, killing child only", pgid, e);
                    let _ = child.kill();
                }
                child.wait()?;
                None
            }
        };

        Ok(CommandOutcome {
            status,
            stdout: read_capture(&mut stdout)?,
            stderr: read_capture(&mut stderr)?,
            elapsed: started.elapsed(),
        })
    }
}

fn read_capture(file: &mut File) -> io::Result<String> {
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_command_success() {
        let outcome = ExternalCommand::shell("echo hello; echo oops >&2", Duration::from_secs(5))
            .run()
            .unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.stdout.trim(), "hello");
        assert_eq!(outcome.stderr.trim(), "oops");
    }

    #[test]
    fn test_exit_code_reported() {
        let outcome = ExternalCommand::shell("exit 7", Duration::from_secs(5)).run().unwrap();
        assert!(!outcome.success());
        assert!(!outcome.timed_out());
        assert_eq!(outcome.code(), Some(7));
    }

    #[test]
    fn test_timeout_kills_process_group() {
        let temp = tempfile::TempDir::new().unwrap();
        let marker = temp.path().join("survived");
        let script = format!("(sleep 2; touch {}) & sleep 30", marker.display());

        let outcome = ExternalCommand::shell(&script, Duration::from_millis(300)).run().unwrap();

        assert!(outcome.timed_out());
        assert!(outcome.elapsed < Duration::from_secs(10));
        std::thread::sleep(Duration::from_secs(3));
        assert!(!marker.exists(), "background child outlived the timeout");
    }

    #[test]
    fn test_env_and_cwd() {
        let temp = tempfile::TempDir::new().unwrap();
        let outcome = ExternalCommand::shell("echo \"$GREETING\"; pwd", Duration::from_secs(5))
            .env("GREETING", "hi")
            .current_dir(temp.path())
            .run()
            .unwrap();
        let lines: Vec<&str> = outcome.stdout.lines().collect();
        assert_eq!(lines[0], "hi");
        assert_eq!(
            Path::new(lines[1]).canonicalize().unwrap(),
            temp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_large_output_does_not_block() {
        let outcome = ExternalCommand::shell("head -c 1000000 /dev/zero | tr '\\0' 'x'", Duration::from_secs(10))
            .run()
            .unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.stdout.len(), 1_000_000);
    }
}
