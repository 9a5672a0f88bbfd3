//! Pre-flight checks before starting the bot.
//!
//! Validates that required tools and configuration are available
//! before accepting requests that would otherwise fail one by one.

use crate::config::Settings;
use crate::error::{LydError, Result};
use std::process::Command;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Running the bot requires the tools and a bot token.
    Bot,
    /// A local grab only needs the tools.
    Grab,
}

/// Run pre-flight checks for the given operation.
///
/// Returns Ok(()) if all checks pass, or an error describing what's missing.
pub fn check(operation: Operation, settings: &Settings) -> Result<()> {
    if let Operation::Bot = operation {
        settings.telegram_token()?;
    }
    check_tool(&settings.extraction.ytdlp_path)?;
    check_tool("ffmpeg")?;
    check_tool("ffprobe")?;
    Ok(())
}

/// Check if an external tool is available.
fn check_tool(name: &str) -> Result<()> {
    // ffmpeg/ffprobe use -version (single dash), others use --version
    let version_arg = if name.ends_with("ffmpeg") || name.ends_with("ffprobe") {
        "-version"
    } else {
        "--version"
    };
    match Command::new(name).arg(version_arg).output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(_) => Err(LydError::ToolNotFound(format!(
            "{} is installed but not working correctly",
            name
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(LydError::ToolNotFound(name.to_string()))
        }
        Err(e) => Err(LydError::ToolNotFound(format!("{}: {}", name, e))),
    }
}
