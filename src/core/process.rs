//! Process execution utilities with timeout support
//!
//! Provides helpers for running external processes (yt-dlp, ffmpeg)
//! with configurable timeouts so a hung process never blocks a worker.

use std::process::Output;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Timeout for quick version probes (`yt-dlp --version`).
pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },
}

/// Run an async Command with a timeout.
///
/// The child is killed when the timeout fires or when the returned future is
/// dropped, so cancelling a pipeline never leaves a stray process behind.
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output, ProcessError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    cmd.kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(source)) => Err(ProcessError::Spawn { program, source }),
        Err(_) => Err(ProcessError::TimedOut { program, timeout }),
    }
}

/// Last non-empty lines of a process stream, for log lines and error messages.
pub fn tail_lines(bytes: &[u8], max_lines: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let mut cmd = Command::new("definitely-not-a-real-binary-4f1c");
        let err = run_with_timeout(&mut cmd, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_fires() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_with_timeout(&mut cmd, Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
    }

    #[test]
    fn test_tail_lines() {
        let out = b"one\n\ntwo\nthree\n";
        assert_eq!(tail_lines(out, 2), "two\nthree");
        assert_eq!(tail_lines(out, 10), "one\ntwo\nthree");
        assert_eq!(tail_lines(b"", 3), "");
    }
}
