//! Subprocess and clock seams.
//!
//! The local mail transports talk to `sendmail`, `mailq`, `systemctl`,
//! `journalctl`, `pveum` and the forwarder binary. All of them go through a
//! [`ProcessRunner`] so tests can script outputs and capture stdin without
//! touching the host. Pauses go through a [`Clock`] for the same reason.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::NotifyError;

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` when killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Build a successful output, mostly for scripted runners.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Exit code for messages (`signal` when there is none).
    pub fn status_display(&self) -> String {
        match self.status {
            Some(code) => code.to_string(),
            None => "signal".to_string(),
        }
    }
}

/// Runs external programs.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` to completion, feeding `stdin` when given.
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> io::Result<ProcessOutput>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
///
/// Children are killed when the future is dropped, so a cancelled send never
/// leaves a stray `sendmail` behind.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioRunner;

#[async_trait]
impl ProcessRunner for TokioRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> io::Result<ProcessOutput> {
        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let feed = child.stdin.take();
        let write = async move {
            match (feed, stdin) {
                (Some(mut pipe), Some(data)) => {
                    let result = pipe.write_all(data).await;
                    drop(pipe);
                    result
                }
                _ => Ok(()),
            }
        };
        // write and read concurrently so a chatty child can not block on a full pipe
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output?;
        if let Err(e) = written {
            // EPIPE when the child exits before reading everything; its exit status tells more
            tracing::debug!(program, error = %e, "Failed to write process stdin");
        }

        Ok(ProcessOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run a program, aborting on cancellation.
///
/// Spawn failures become [`NotifyError::Transport`]; the exit status is left
/// to the caller.
pub async fn run_cancellable(
    runner: &dyn ProcessRunner,
    program: &str,
    args: &[&str],
    stdin: Option<&[u8]>,
    cancel: &CancellationToken,
) -> Result<ProcessOutput, NotifyError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(NotifyError::Cancelled),
        output = runner.run(program, args, stdin) => output
            .map_err(|e| NotifyError::Transport(format!("failed to run {}: {}", program, e))),
    }
}

/// Source of pauses.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that never waits.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopClock;

#[async_trait]
impl Clock for NoopClock {
    async fn sleep(&self, _duration: Duration) {}
}

/// Sleep on `clock`, returning early with `Cancelled` if the token fires.
pub async fn pause(
    clock: &dyn Clock,
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), NotifyError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(NotifyError::Cancelled),
        _ = clock.sleep(duration) => Ok(()),
    }
}

/// Resolve a binary: paths containing `/` must exist as files, bare names
/// are searched in `PATH`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    if name.contains('/') {
        let path = Path::new(name);
        return path.is_file().then(|| path.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted runner for unit tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Call {
        pub program: String,
        pub args: Vec<String>,
        pub stdin: Option<Vec<u8>>,
    }

    /// Returns queued outputs per program; the last one repeats. Programs
    /// without a script fail with `NotFound`.
    #[derive(Debug, Default)]
    pub struct ScriptedRunner {
        scripts: Mutex<HashMap<String, VecDeque<ProcessOutput>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(self, program: &str, output: ProcessOutput) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .entry(program.to_string())
                .or_default()
                .push_back(output);
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_to(&self, program: &str) -> Vec<Call> {
            self.calls()
                .into_iter()
                .filter(|c| c.program == program)
                .collect()
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(
            &self,
            program: &str,
            args: &[&str],
            stdin: Option<&[u8]>,
        ) -> io::Result<ProcessOutput> {
            self.calls.lock().unwrap().push(Call {
                program: program.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                stdin: stdin.map(<[u8]>::to_vec),
            });
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(program) {
                Some(queue) if queue.len() > 1 => Ok(queue.pop_front().unwrap_or_default()),
                Some(queue) if !queue.is_empty() => Ok(queue[0].clone()),
                _ => Err(io::Error::new(io::ErrorKind::NotFound, "not scripted")),
            }
        }
    }
}
