//! Error types for command execution

use crate::signals::EXIT_CODE_COMMAND_NOT_FOUND;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Empty or unparseable command: {0}")]
    InvalidCommand(String),

    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("{}", failure_message(.command, *.exit_code, .stdout, .stderr))]
    CommandFailed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("OS root directory {0} lacks an operating system (os-release file is missing)")]
    OsRootInvalid(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExecError>;

const REASON_LIMIT: usize = 500;

/// Build a diagnosable message for a failed invocation.
///
/// The captured stderr is embedded (truncated) so the caller or the log
/// can explain the failure without re-running the command. Exit status
/// 203 from `systemd-run` is its "file/command not found" convention
/// and arrives with empty stderr, so it gets a synthesized reason.
pub(crate) fn failure_message(command: &str, exit_code: i32, stdout: &str, stderr: &str) -> String {
    let mut message = format!(
        "Command '{}' returned non-zero exit status {}.",
        command, exit_code
    );

    let mut reason = stderr.trim().to_string();

    if reason.is_empty() {
        let stdout_prefix: String = stdout.chars().take(200).collect();
        if stdout_prefix.contains("execv") && stdout_prefix.contains("failed") {
            reason = stdout.trim().to_string();
        }
    }

    if reason.is_empty() && exit_code == EXIT_CODE_COMMAND_NOT_FOUND {
        let real_command = command.split_whitespace().last().unwrap_or("<unknown>");
        reason = format!("{}: No such file or directory", real_command);
    }

    if !reason.is_empty() {
        if reason.chars().count() > REASON_LIMIT {
            reason = reason.chars().take(REASON_LIMIT).collect::<String>() + "...";
        }
        message.push_str(&format!(" Reason: {}", reason));
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_embeds_stderr() {
        let msg = failure_message("machinectl terminate foo", 1, "", "No machine 'foo' known");
        assert!(msg.contains("exit status 1"));
        assert!(msg.contains("No machine 'foo' known"));
    }

    #[test]
    fn exit_203_means_command_not_found() {
        let msg = failure_message("systemd-run --machine=m --wait /bin/nonexistent", 203, "", "");
        assert!(msg.contains("/bin/nonexistent: No such file or directory"));
    }

    #[test]
    fn long_stderr_is_truncated() {
        let noisy = "x".repeat(2000);
        let msg = failure_message("cmd", 1, "", &noisy);
        assert!(msg.len() < 700);
        assert!(msg.ends_with("..."));
    }
}
