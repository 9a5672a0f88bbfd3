//! YouTube link validation.
//!
//! A locator is accepted only when it names exactly one video on one of the
//! recognized YouTube hosts. Query parameters and fragments after the video id
//! are ignored, so links shared from a playlist or with a start time still pass.
//! The scheme and host are case-insensitive and one trailing slash is allowed.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static LOCATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^
        (?:https?://)?
        (?:
            (?:www\.|m\.)?youtube\.com/(?:watch\?v=|embed/|shorts/|live/|v/)
            |
            youtu\.be/
            |
            (?:www\.)?youtube-nocookie\.com/embed/
        )
        ([A-Za-z0-9_-]{11})
        $
    ",
    )
    .expect("locator pattern is valid")
});

/// A link that passed validation, reduced to its video id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedLocator {
    video_id: String,
    canonical_url: String,
}

impl ValidatedLocator {
    /// Validate `raw` and build its canonical form.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = normalize(raw.trim());
        let caps = LOCATOR_RE.captures(&normalized)?;
        let video_id = caps.get(1)?.as_str().to_string();

        Some(Self {
            canonical_url: format!("https://www.youtube.com/watch?v={video_id}"),
            video_id,
        })
    }

    /// The 11-character video id.
    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    /// The watch URL handed to yt-dlp.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }
}

impl fmt::Display for ValidatedLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_url)
    }
}

/// Returns true when `raw` is a well-formed single-video YouTube link.
pub fn validate(raw: &str) -> bool {
    ValidatedLocator::parse(raw).is_some()
}

/// Lower-case the scheme and host, then drop the fragment, trailing query
/// parameters and one trailing slash.
///
/// On the watch path the `v` parameter is part of the shape, so only what follows
/// its value is removed.
fn normalize(input: &str) -> String {
    let input = input.split('#').next().unwrap_or(input);

    let scheme_end = input
        .find("://")
        .filter(|&pos| input[..pos].chars().all(|c| c.is_ascii_alphabetic()));
    let (scheme, rest) = match scheme_end {
        Some(pos) => (input[..pos + 3].to_ascii_lowercase(), &input[pos + 3..]),
        None => (String::new(), input),
    };
    let (host, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));

    let path = match path.strip_prefix("/watch?v=") {
        Some(value) => {
            let end = value.find(['&', '?']).unwrap_or(value.len());
            format!("/watch?v={}", &value[..end])
        }
        None => path.split('?').next().unwrap_or(path).to_string(),
    };
    let path = path.strip_suffix('/').unwrap_or(&path);

    format!("{scheme}{}{path}", host.to_ascii_lowercase())
}
