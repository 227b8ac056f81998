//! External command invocation with a bounded run time.
//!
//! Commands run on the shared tokio runtime so the timeout can kill a hung
//! child. The working directory is always passed explicitly; the process-wide
//! current directory is never touched.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use crate::fetch::SHARED_RUNTIME;

/// Exit status and combined (stdout then stderr) output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub output: String,
}

impl CommandOutput {
    /// Turn a non-zero exit into `ProcessError::Exited`.
    pub fn check(self, program: &str) -> Result<Self, ProcessError> {
        if self.success {
            Ok(self)
        } else {
            Err(ProcessError::Exited {
                program: program.to_string(),
                code: self.code,
                output: self.output,
            })
        }
    }
}

/// Failure to run a command to completion.
///
/// `run_with_timeout` never returns `Exited`: callers decide what a non-zero
/// exit means and opt in with [`CommandOutput::check`].
#[derive(Debug)]
pub enum ProcessError {
    /// The program could not be started (missing binary, permissions)
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// The program did not exit within the allowed time and was killed
    TimedOut { program: String, timeout: Duration },
    /// Collecting the program's output failed
    Io {
        program: String,
        source: std::io::Error,
    },
    /// The program ran and exited non-zero
    Exited {
        program: String,
        code: Option<i32>,
        output: String,
    },
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn { program, source } => write!(f, "failed to run {program}: {source}"),
            Self::TimedOut { program, timeout } => {
                write!(f, "{program} did not finish within {}s", timeout.as_secs_f32())
            }
            Self::Io { program, source } => write!(f, "IO error waiting for {program}: {source}"),
            Self::Exited {
                program,
                code,
                output,
            } => {
                match code {
                    Some(code) => write!(f, "{program} exited with status {code}")?,
                    None => write!(f, "{program} was killed by a signal")?,
                }
                match output.lines().find(|l| !l.trim().is_empty()) {
                    Some(line) => write!(f, ": {}", line.trim()),
                    None => Ok(()),
                }
            }
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn { source, .. } | Self::Io { source, .. } => Some(source),
            Self::TimedOut { .. } | Self::Exited { .. } => None,
        }
    }
}

/// Run `program args...`, optionally inside `cwd`, killing it after `timeout`.
pub fn run_with_timeout<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput, ProcessError> {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    SHARED_RUNTIME.handle().block_on(async {
        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ProcessError::Io {
                program: program.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(ProcessError::TimedOut {
                    program: program.to_string(),
                    timeout,
                });
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            output: text,
        })
    })
}
