use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use url::Url;

use crate::error::{ContributionError, ContributionResult};

/// Validate a URL and return the parsed form
pub fn validate_url(url: &str) -> ContributionResult<Url> {
    let parsed = Url::parse(url)
        .map_err(|_| ContributionError::invalid_request(format!("Invalid URL format: {}", url)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ContributionError::invalid_request(
            "URL must use HTTP or HTTPS protocol",
        ));
    }

    Ok(parsed)
}

/// Lowercase slug: runs of non-alphanumeric characters collapse into one `-`
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Format file size in human-readable format
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let unit_index = (bytes_f.log10() / THRESHOLD.log10()).floor() as usize;
    let unit_index = unit_index.min(UNITS.len() - 1);

    let size = bytes_f / THRESHOLD.powi(unit_index as i32);

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Output of an external command that ran to completion
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Failure to get a result out of an external command at all
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("'{0}' is not installed or not in PATH")]
    NotFound(String),

    #[error("'{program}' did not finish within {}s", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run an external program under a timeout and capture its output
pub async fn run_command(
    program: &str,
    args: &[&str],
    current_dir: Option<&std::path::Path>,
    envs: &[(String, String)],
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = current_dir {
        command.current_dir(dir);
    }

    tracing::debug!("Running: {} {}", program, args.join(" "));

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Err(_) => {
            return Err(CommandError::TimedOut {
                program: program.to_string(),
                timeout,
            })
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CommandError::NotFound(program.to_string()))
        }
        Ok(Err(e)) => {
            return Err(CommandError::Spawn {
                program: program.to_string(),
                source: e,
            })
        }
        Ok(Ok(output)) => output,
    };

    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Check that every required external tool is available.
///
/// Returns `DependencyMissing` naming all absent tools.
pub async fn check_dependencies(tools: &[&str]) -> ContributionResult<()> {
    let mut missing = Vec::new();

    for tool in tools {
        if !check_command_available(tool).await {
            missing.push(tool.to_string());
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ContributionError::DependencyMissing(missing.join(", ")))
    }
}

/// Check if a command is available in PATH
pub async fn check_command_available(command: &str) -> bool {
    Command::new(command)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}
