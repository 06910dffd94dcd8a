//! yt-dlp maintenance: version probe and self-update.
//!
//! Sites change their players often, so the bot checks for an extractor
//! update at startup. A standalone binary updates itself with `-U`; a pip
//! install answers `-U` with exit code 100 and is upgraded through pip.

use std::time::Duration;
use tokio::process::Command;

use crate::core::error::{AppError, AppResult};
use crate::core::process::{run_with_timeout, tail_lines, VERSION_PROBE_TIMEOUT};

/// Time allowed for one update attempt.
const UPDATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Exit code yt-dlp uses when it cannot self-update (installed via pip).
const PIP_INSTALL_EXIT_CODE: i32 = 100;

/// What an update attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    AlreadyCurrent,
    Updated(String),
    /// Nothing worked; the bot keeps running with the installed version.
    Failed(String),
}

/// Returns the installed yt-dlp version string.
pub async fn ytdlp_version(bin: &str) -> AppResult<String> {
    let mut cmd = Command::new(bin);
    cmd.arg("--version");
    let output = run_with_timeout(&mut cmd, VERSION_PROBE_TIMEOUT).await?;

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() || version.is_empty() {
        return Err(AppError::Validation(format!(
            "{} --version produced no version: {}",
            bin,
            tail_lines(&output.stderr, 3)
        )));
    }
    Ok(version)
}

/// Tries `yt-dlp -U`, falling back to `pip3`/`pip install --upgrade yt-dlp`.
pub async fn update_ytdlp(bin: &str) -> UpdateOutcome {
    log::info!("Checking for yt-dlp updates...");

    let mut cmd = Command::new(bin);
    cmd.arg("-U");
    let output = match run_with_timeout(&mut cmd, UPDATE_TIMEOUT).await {
        Ok(output) => output,
        Err(e) => {
            log::warn!("yt-dlp self-update did not run: {}", e);
            return UpdateOutcome::Failed(e.to_string());
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    if output.status.success() {
        return classify_update_output(&stdout);
    }

    if output.status.code() == Some(PIP_INSTALL_EXIT_CODE) {
        log::info!("yt-dlp is installed via pip, updating through pip");
        return update_via_pip().await;
    }

    let stderr = tail_lines(&output.stderr, 3);
    log::warn!("yt-dlp -U failed: {}", stderr);
    UpdateOutcome::Failed(stderr)
}

fn classify_update_output(stdout: &str) -> UpdateOutcome {
    let lower = stdout.to_lowercase();
    if lower.contains("up to date") || lower.contains("up-to-date") {
        log::info!("yt-dlp is already up to date");
        UpdateOutcome::AlreadyCurrent
    } else {
        let summary = stdout.trim().lines().last().unwrap_or_default().to_string();
        log::info!("yt-dlp updated: {}", summary);
        UpdateOutcome::Updated(summary)
    }
}

async fn update_via_pip() -> UpdateOutcome {
    let mut last_error = String::from("no pip executable found");

    for pip in ["pip3", "pip"] {
        let mut cmd = Command::new(pip);
        cmd.args(["install", "--upgrade", "yt-dlp"]);
        match run_with_timeout(&mut cmd, UPDATE_TIMEOUT).await {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                if stdout.contains("Requirement already satisfied") && !stdout.contains("Successfully installed") {
                    log::info!("yt-dlp is already up to date ({})", pip);
                    return UpdateOutcome::AlreadyCurrent;
                }
                log::info!("yt-dlp updated via {}", pip);
                return UpdateOutcome::Updated(format!("upgraded via {}", pip));
            }
            Ok(output) => {
                last_error = format!("{} exited with {}: {}", pip, output.status, tail_lines(&output.stderr, 3));
                log::debug!("{}", last_error);
            }
            Err(e) => {
                last_error = e.to_string();
                log::debug!("{} update error: {}", pip, e);
            }
        }
    }

    log::warn!(
        "Failed to update yt-dlp via pip: {}. Run 'pip install --upgrade yt-dlp' manually.",
        last_error
    );
    UpdateOutcome::Failed(last_error)
}
