//! Host command execution
//!
//! Runs a shell command string as a subprocess on the host, with
//! configurable output handling. This is the single spawn path used by
//! everything else: the boot launcher, the in-container runner, and the
//! provisioning helpers all funnel through [`run_host`].

use crate::{ExecError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Output handling for a single invocation
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Raise `CommandFailed` on non-zero exit
    pub check: bool,
    /// Capture stdout/stderr into the result
    pub capture: bool,
    /// While capturing, also echo output live to the caller's streams
    pub tee: bool,
    /// Inherit the caller's stdio (interactive / pseudo-terminal use)
    pub interactive: bool,
    /// Working directory for the subprocess
    pub cwd: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            check: true,
            capture: false,
            tee: false,
            interactive: false,
            cwd: None,
        }
    }
}

impl RunOptions {
    /// Capture both streams quietly
    pub fn captured() -> Self {
        Self {
            capture: true,
            ..Self::default()
        }
    }

    /// Capture both streams without raising on non-zero exit
    pub fn captured_unchecked() -> Self {
        Self {
            check: false,
            capture: true,
            ..Self::default()
        }
    }
}

/// Result of a completed invocation
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a command on the host system.
///
/// The command string is split into argv tokens using shell-word rules,
/// so quoted payload arguments survive the wrapping performed by the
/// container runners.
pub async fn run_host(command: &str, opts: &RunOptions) -> Result<CommandOutput> {
    let argv =
        shell_words::split(command).map_err(|_| ExecError::InvalidCommand(command.to_string()))?;
    let program = argv
        .first()
        .ok_or_else(|| ExecError::InvalidCommand(command.to_string()))?;

    tracing::debug!("Running command on host system: {}", command);

    let mut cmd = Command::new(program);
    cmd.args(&argv[1..]);
    if let Some(ref cwd) = opts.cwd {
        cmd.current_dir(cwd);
    }
    // Cancellation of the caller's future must not leave the subprocess
    // behind; the boot launcher in particular outlives its caller.
    cmd.kill_on_drop(true);

    let output = if opts.capture && !opts.interactive {
        run_captured(cmd, opts.tee).await?
    } else {
        run_inherited(cmd).await?
    };

    if opts.check && !output.success() {
        return Err(ExecError::CommandFailed {
            command: command.to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        });
    }

    Ok(output)
}

async fn run_inherited(mut cmd: Command) -> Result<CommandOutput> {
    let command = format!("{:?}", cmd.as_std());
    let mut child = cmd.spawn().map_err(|e| ExecError::SpawnFailed {
        command,
        source: e,
    })?;
    let status = child.wait().await?;
    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: String::new(),
        stderr: String::new(),
    })
}

async fn run_captured(mut cmd: Command, tee: bool) -> Result<CommandOutput> {
    let command = format!("{:?}", cmd.as_std());
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| ExecError::SpawnFailed {
        command,
        source: e,
    })?;

    let stdout = child.stdout.take().expect("stdout must exist when piped");
    let stderr = child.stderr.take().expect("stderr must exist when piped");

    // Drain both streams concurrently; consuming only one can block the
    // child once the other pipe's OS buffer fills up.
    let stdout_task = tokio::spawn(read_stream(stdout, tee, false));
    let stderr_task = tokio::spawn(read_stream(stderr, tee, true));

    let status = child.wait().await?;
    let stdout = stdout_task.await.unwrap_or_else(|_| Ok(String::new()))?;
    let stderr = stderr_task.await.unwrap_or_else(|_| Ok(String::new()))?;

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

async fn read_stream<R>(stream: R, tee: bool, to_stderr: bool) -> Result<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    let mut buffer = String::new();

    while let Some(line) = lines.next_line().await? {
        if tee {
            if to_stderr {
                eprintln!("{}", line);
            } else {
                println!("{}", line);
            }
        }
        buffer.push_str(&line);
        buffer.push('\n');
    }

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let output = run_host("/bin/echo hello world", &RunOptions::captured())
            .await
            .unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.trim(), "hello world");
    }

    #[tokio::test]
    async fn quoted_arguments_stay_intact() {
        let output = run_host("/bin/echo 'hello world' second", &RunOptions::captured())
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello world second");
    }

    #[tokio::test]
    async fn nonzero_exit_raises_when_checked() {
        let err = run_host("/bin/false", &RunOptions::captured())
            .await
            .unwrap_err();
        match err {
            ExecError::CommandFailed { exit_code, .. } => assert_eq!(exit_code, 1),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_tolerated_when_unchecked() {
        let output = run_host("/bin/false", &RunOptions::captured_unchecked())
            .await
            .unwrap();
        assert_eq!(output.exit_code, 1);
    }

    #[tokio::test]
    async fn stderr_is_captured_into_the_error() {
        let err = run_host(
            "/bin/sh -c 'echo oops >&2; exit 3'",
            &RunOptions::captured(),
        )
        .await
        .unwrap_err();
        match err {
            ExecError::CommandFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let err = run_host("", &RunOptions::captured()).await.unwrap_err();
        assert!(matches!(err, ExecError::InvalidCommand(_)));
    }
}
