//! Terminal reply sink used by `lydbot grab`.

use super::{ChatId, ReplySink};
use crate::audio::{Phase, ProgressEvent};
use crate::error::Result;
use async_trait::async_trait;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Prints replies to the terminal and saves audio into a directory.
pub struct ConsoleSink {
    out_dir: PathBuf,
    bar: ProgressBar,
    saved: Mutex<Option<PathBuf>>,
}

impl ConsoleSink {
    pub fn new(out_dir: &Path) -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} {msg:<24} [{bar:30.cyan/blue}] {pos:>3}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );

        Self {
            out_dir: out_dir.to_path_buf(),
            bar,
            saved: Mutex::new(None),
        }
    }

    /// Path of the saved audio file, once delivered.
    pub fn saved_path(&self) -> Option<PathBuf> {
        self.saved.lock().ok().and_then(|p| p.clone())
    }

    /// Clear the progress bar.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

#[async_trait]
impl ReplySink for ConsoleSink {
    async fn send_text(&self, _chat: ChatId, text: &str) -> Result<()> {
        self.bar.println(format!("{} {}", style(">>").cyan().bold(), text));
        Ok(())
    }

    async fn send_audio(&self, _chat: ChatId, bytes: Vec<u8>, filename: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.out_dir).await?;
        let target = self.out_dir.join(filename);
        tokio::fs::write(&target, bytes).await?;

        if let Ok(mut saved) = self.saved.lock() {
            *saved = Some(target);
        }
        Ok(())
    }

    async fn send_progress(&self, _chat: ChatId, event: &ProgressEvent) -> Result<()> {
        match event.phase {
            Phase::Downloading => {
                self.bar.set_message("Downloading");
                if let Some(percent) = event.percent {
                    self.bar.set_position(percent as u64);
                }
            }
            Phase::Postprocessing => {
                self.bar.set_position(100);
                self.bar.set_message("Converting to MP3");
            }
            _ => self.bar.set_message(event.describe()),
        }
        self.bar.tick();
        Ok(())
    }
}
