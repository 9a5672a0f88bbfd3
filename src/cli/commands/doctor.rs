//! Doctor command - verify system requirements and configuration.

use crate::cli::{format_size, Output};
use crate::config::Settings;
use console::style;
use std::process::Command;

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

/// Print a group of checks under a heading and collect them.
fn section(title: &str, results: Vec<CheckResult>, all: &mut Vec<CheckResult>) {
    println!("{}", style(title).bold());
    for result in &results {
        result.print();
    }
    println!();
    all.extend(results);
}

/// Run all diagnostic checks.
pub fn run_doctor(settings: &Settings, config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    Output::header("Lydbot Doctor");
    println!();
    println!("Checking system requirements and configuration...\n");

    let mut checks = Vec::new();

    section(
        "External Tools",
        vec![
            check_tool("yt-dlp", &settings.extraction.ytdlp_path, "--version", install_hint_ytdlp()),
            check_tool("ffmpeg", "ffmpeg", "-version", install_hint_ffmpeg()),
            check_tool("ffprobe", "ffprobe", "-version", install_hint_ffmpeg()),
        ],
        &mut checks,
    );

    section("Telegram", check_telegram(settings), &mut checks);
    section("Directories", check_directories(settings), &mut checks);

    let config_path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(Settings::default_config_path);
    section("Configuration", vec![check_config_file(&config_path), check_cookies(settings)], &mut checks);

    // Summary
    let errors = checks.iter().filter(|c| c.status == CheckStatus::Error).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Please fix them before starting the bot.",
            errors
        ));
        std::process::exit(1);
    } else if warnings > 0 {
        Output::warning(&format!(
            "All checks passed with {} warning(s).",
            warnings
        ));
    } else {
        Output::success("All checks passed! Lydbot is ready to run.");
    }

    Ok(())
}

/// Check if an external tool is available.
fn check_tool(name: &str, program: &str, version_arg: &str, hint: &str) -> CheckResult {
    match Command::new(program).arg(version_arg).output() {
        Ok(output) if output.status.success() => {
            // Try to extract version from first line
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or("installed")
                .trim()
                .to_string();

            CheckResult::ok(name, &truncate(&version, 50))
        }
        Ok(_) => CheckResult::error(name, "installed but not working", hint),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            CheckResult::error(name, &format!("{} not found", program), hint)
        }
        Err(e) => CheckResult::error(name, &format!("error: {}", e), hint),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

/// Check the bot token and webhook settings.
fn check_telegram(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    match settings.telegram_token() {
        Ok(token) => results.push(CheckResult::ok("Bot token", &format!("configured ({})", mask_token(&token)))),
        Err(_) => results.push(CheckResult::error(
            "Bot token",
            "not set",
            "Set TELEGRAM_BOT_TOKEN in the environment or a .env file",
        )),
    }

    match &settings.telegram.webhook_url {
        Some(url) if url.starts_with("https://") => {
            results.push(CheckResult::ok("Webhook", url));
        }
        Some(url) => results.push(CheckResult::warning(
            "Webhook",
            url,
            "Telegram only delivers webhooks over HTTPS",
        )),
        None => results.push(CheckResult::ok("Webhook", "not configured (long polling)")),
    }

    results
}

/// Show only the bot id and the last characters of a token.
pub(super) fn mask_token(token: &str) -> String {
    match token.split_once(':') {
        Some((id, secret)) if secret.len() > 4 => {
            format!("{}:...{}", id, &secret[secret.len() - 4..])
        }
        _ => "set but format looks unusual".to_string(),
    }
}

/// Check data, working and audit locations.
fn check_directories(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    for (name, dir) in [("Data directory", settings.data_dir()), ("Working directory", settings.work_dir())] {
        if dir.exists() {
            results.push(CheckResult::ok(name, &format!("{}", dir.display())));
        } else {
            results.push(CheckResult::warning(
                name,
                &format!("{} (will be created)", dir.display()),
                "Directory will be created on first use",
            ));
        }
    }

    let log_path = settings.audit_log_path();
    if log_path.exists() {
        let size = std::fs::metadata(&log_path)
            .map(|m| format_size(m.len()))
            .unwrap_or_else(|_| "unknown size".to_string());
        results.push(CheckResult::ok(
            "Audit log",
            &format!("{} ({})", log_path.display(), size),
        ));
    } else {
        results.push(CheckResult::warning(
            "Audit log",
            &format!("{} (not created yet)", log_path.display()),
            "The log is created with the first request",
        ));
    }

    results
}

/// Check if config file exists.
fn check_config_file(config_path: &std::path::Path) -> CheckResult {
    if config_path.exists() {
        CheckResult::ok("Config file", &format!("{}", config_path.display()))
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: lydbot config edit",
        )
    }
}

fn check_cookies(settings: &Settings) -> CheckResult {
    match settings.extraction.cookies_path() {
        Some(path) if path.exists() => CheckResult::ok("Cookies file", &format!("{}", path.display())),
        Some(path) => CheckResult::error(
            "Cookies file",
            &format!("{} does not exist", path.display()),
            "Fix extraction.cookies_file or remove it",
        ),
        None => CheckResult::ok("Cookies file", "not used"),
    }
}

/// Platform-specific install hint for yt-dlp.
fn install_hint_ytdlp() -> &'static str {
    if cfg!(target_os = "macos") {
        "Install with: brew install yt-dlp"
    } else if cfg!(target_os = "linux") {
        "Install with: pip install yt-dlp (or your package manager)"
    } else {
        "Install from: https://github.com/yt-dlp/yt-dlp"
    }
}

/// Platform-specific install hint for ffmpeg.
fn install_hint_ffmpeg() -> &'static str {
    if cfg!(target_os = "macos") {
        "Install with: brew install ffmpeg"
    } else if cfg!(target_os = "linux") {
        "Install with: sudo apt install ffmpeg (or your package manager)"
    } else {
        "Install from: https://ffmpeg.org/download.html"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result_ok() {
        let result = CheckResult::ok("test", "passed");
        assert_eq!(result.status, CheckStatus::Ok);
        assert!(result.hint.is_none());
    }

    #[test]
    fn test_check_result_error() {
        let result = CheckResult::error("test", "failed", "fix it");
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.hint, Some("fix it".to_string()));
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("123456:ABCdefGHIjkl"), "123456:...Ijkl");
        assert_eq!(mask_token("garbage"), "set but format looks unusual");
    }

    #[test]
    fn test_missing_tool() {
        let result = check_tool("yt-dlp", "lydbot-no-such-tool", "--version", "install it");
        assert_eq!(result.status, CheckStatus::Error);
    }

    #[test]
    fn test_missing_cookies_file_is_an_error() {
        let mut settings = Settings::default();
        settings.extraction.cookies_file = Some("/nonexistent/lydbot/cookies.txt".to_string());
        assert_eq!(check_cookies(&settings).status, CheckStatus::Error);
    }
}
