//! Config command implementation.

use super::doctor::mask_token;
use crate::cli::{ConfigAction, Output};
use crate::config::Settings;
use anyhow::Result;
use std::path::PathBuf;

/// Run the config command.
///
/// `config_path` is the file given with `--config`, if any.
pub fn run_config(action: &ConfigAction, mut settings: Settings, config_path: Option<PathBuf>) -> Result<()> {
    let config_path = config_path.unwrap_or_else(Settings::default_config_path);

    match action {
        ConfigAction::Show => {
            let mut shown = settings.clone();
            if shown.telegram.token.is_some() {
                shown.telegram.token = Some("<hidden>".to_string());
            }
            let toml_str = toml::to_string_pretty(&shown)
                .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;
            println!("{}", toml_str);
        }

        ConfigAction::Set { key, value } => {
            settings.set_value(key, value)?;
            settings.save_to(&config_path)?;
            Output::success(&format!("Set {} = {}", key, displayed_value(key, value)));
            Output::kv("Config file", &config_path.display().to_string());
        }

        ConfigAction::Edit => {
            // Create default config if it doesn't exist
            if !config_path.exists() {
                settings.save_to(&config_path)?;
                Output::info(&format!("Created default config at {:?}", config_path));
            }

            let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vim".to_string());

            Output::info(&format!("Opening config in {}...", editor));

            let status = std::process::Command::new(&editor)
                .arg(&config_path)
                .status();

            match status {
                Ok(s) if s.success() => {
                    Output::success("Config saved.");
                }
                Ok(_) => {
                    Output::warning("Editor exited with non-zero status.");
                }
                Err(e) => {
                    Output::error(&format!("Failed to open editor: {}", e));
                    Output::info(&format!("Config file is at: {:?}", config_path));
                }
            }
        }

        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }

    Ok(())
}

/// The value echoed after `set`. Secrets are masked.
fn displayed_value(key: &str, value: &str) -> String {
    match key {
        "telegram.token" => mask_token(value),
        "telegram.webhook_secret" => "<hidden>".to_string(),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_writes_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let action = ConfigAction::Set {
            key: "delivery.max_attempts".to_string(),
            value: "2".to_string(),
        };
        run_config(&action, Settings::default(), Some(path.clone())).unwrap();

        let saved = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(saved.delivery.max_attempts, 2);
    }

    #[test]
    fn test_set_masks_secrets() {
        assert_eq!(displayed_value("telegram.token", "123456:ABCdefGHIjkl"), "123456:...Ijkl");
        assert!(!displayed_value("telegram.webhook_secret", "hunter2hunter2").contains("hunter2"));
        assert_eq!(displayed_value("extraction.max_concurrent", "4"), "4");
    }

    #[test]
    fn test_set_rejects_unknown_section() {
        let dir = tempfile::tempdir().unwrap();
        let action = ConfigAction::Set {
            key: "nope.field".to_string(),
            value: "1".to_string(),
        };
        assert!(run_config(&action, Settings::default(), Some(dir.path().join("c.toml"))).is_err());
    }
}
