//! yt-dlp based audio extraction.
//!
//! Runs yt-dlp as a child process in a per-request working directory, streams
//! its progress output into a channel and classifies failures from stderr.

use super::{
    Artifact, ExtractionConfig, ExtractionFailure, Extractor, FailureClass, ProgressSample,
};
use crate::locator::ValidatedLocator;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const PROGRESS_PREFIX: &str = "lydbot-progress:";
const FILE_PREFIX: &str = "lydbot-file:";
const TITLE_PREFIX: &str = "lydbot-title:";

/// Lines of unrecognized output kept for failure classification.
const OUTPUT_TAIL: usize = 20;

/// Audio extractor backed by the yt-dlp command line tool.
#[derive(Debug, Default, Clone)]
pub struct YtDlpExtractor;

impl YtDlpExtractor {
    pub fn new() -> Self {
        Self
    }

    fn command(locator: &ValidatedLocator, config: &ExtractionConfig, workdir: &Path) -> Command {
        let template = workdir.join(&config.output_template);

        let mut cmd = Command::new(&config.ytdlp_path);
        cmd.arg("--format").arg("bestaudio/best")
            .arg("--extract-audio")
            .arg("--audio-format").arg(&config.audio_format)
            .arg("--audio-quality").arg(format!("{}K", config.audio_quality))
            .arg("--output").arg(&template)
            .arg("--newline")
            .arg("--progress")
            .arg("--no-colors")
            .arg("--progress-template").arg(format!(
                "download:{PROGRESS_PREFIX}%(progress.status)s:%(progress.downloaded_bytes)s:%(progress.total_bytes)s:%(progress.total_bytes_estimate)s"
            ))
            .arg("--print").arg(format!("after_move:{TITLE_PREFIX}%(title)s"))
            .arg("--print").arg(format!("after_move:{FILE_PREFIX}%(filepath)s"));

        if config.no_playlist {
            cmd.arg("--no-playlist");
        }
        if let Some(cookies) = &config.cookies_file {
            cmd.arg("--cookies").arg(cookies);
        }

        cmd.arg("--")
            .arg(locator.canonical_url())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a kill also reaches ffmpeg.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

/// How the child process ended.
enum Exit {
    Finished(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    #[instrument(skip_all, fields(request_id = %config.request_id, video_id = %locator.video_id()))]
    async fn extract(
        &self,
        locator: &ValidatedLocator,
        config: &ExtractionConfig,
        progress: mpsc::Sender<ProgressSample>,
        cancel: CancellationToken,
    ) -> Result<Artifact, ExtractionFailure> {
        let workdir = config.create_workdir().map_err(|e| {
            ExtractionFailure::new(
                FailureClass::ArtifactMissing,
                format!("cannot create working directory: {e}"),
            )
        })?;

        info!("Starting extraction of {}", locator);

        let mut child = match Self::command(locator, config, workdir.path()).spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!(tool = %config.ytdlp_path, "yt-dlp not found");
                return Err(ExtractionFailure::new(
                    FailureClass::Unavailable,
                    format!("{} not found", config.ytdlp_path),
                ));
            }
            Err(e) => {
                return Err(ExtractionFailure::new(
                    FailureClass::Unavailable,
                    format!("failed to start {}: {e}", config.ytdlp_path),
                ));
            }
        };

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(pump_output(out, progress.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(pump_output(err, progress.clone())));

        let exit = tokio::select! {
            status = child.wait() => Exit::Finished(status),
            _ = tokio::time::sleep(config.timeout) => Exit::TimedOut,
            _ = cancel.cancelled() => Exit::Cancelled,
        };

        let status = match exit {
            Exit::Finished(status) => status.map_err(|e| {
                ExtractionFailure::new(FailureClass::NetworkFailure, format!("wait failed: {e}"))
            })?,
            Exit::TimedOut => {
                kill(&mut child).await;
                return Err(ExtractionFailure::new(
                    FailureClass::Timeout,
                    format!("no result after {:?}", config.timeout),
                ));
            }
            Exit::Cancelled => {
                kill(&mut child).await;
                return Err(ExtractionFailure::new(
                    FailureClass::Cancelled,
                    "request abandoned",
                ));
            }
        };

        let stdout = join_output(stdout_task).await;
        let stderr = join_output(stderr_task).await;

        if !status.success() {
            let tail = stderr.tail_text();
            let class = classify_failure(&tail);
            return Err(ExtractionFailure::new(
                class,
                format!("yt-dlp exited with {status}: {tail}"),
            ));
        }

        let reported = stdout.file.or(stderr.file).filter(|p| p.exists());
        let Some(path) = reported.or_else(|| find_audio_file(workdir.path(), &config.audio_format))
        else {
            return Err(ExtractionFailure::new(
                FailureClass::ArtifactMissing,
                format!("no .{} file in {}", config.audio_format, workdir.path().display()),
            ));
        };

        let title = stdout
            .title
            .or(stderr.title)
            .unwrap_or_else(|| locator.video_id().to_string());

        let _ = progress.send(ProgressSample::status("complete")).await;

        let artifact = Artifact::new(path, title, workdir).map_err(|e| {
            ExtractionFailure::new(FailureClass::ArtifactMissing, format!("cannot stat output: {e}"))
        })?;
        info!(bytes = artifact.byte_size(), "Extraction finished");
        Ok(artifact)
    }
}

/// Kill yt-dlp together with its process group.
async fn kill(child: &mut Child) {
    kill_group(child);
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill yt-dlp");
    }
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!(error = %e, "Failed to signal yt-dlp process group");
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

/// What was learned from one output stream.
#[derive(Debug, Default)]
struct StreamOutput {
    file: Option<PathBuf>,
    title: Option<String>,
    tail: VecDeque<String>,
}

impl StreamOutput {
    fn remember(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        if self.tail.len() == OUTPUT_TAIL {
            self.tail.pop_front();
        }
        self.tail.push_back(line.to_string());
    }

    fn tail_text(&self) -> String {
        self.tail.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

/// A classified line of yt-dlp output.
#[derive(Debug, PartialEq)]
enum OutputLine {
    Progress(ProgressSample),
    Postprocessing,
    File(PathBuf),
    Title(String),
    Other,
}

fn classify_line(line: &str) -> OutputLine {
    if let Some(sample) = parse_progress_line(line) {
        return OutputLine::Progress(sample);
    }
    if let Some(path) = line.strip_prefix(FILE_PREFIX) {
        return OutputLine::File(PathBuf::from(path));
    }
    if let Some(title) = line.strip_prefix(TITLE_PREFIX) {
        return OutputLine::Title(title.to_string());
    }
    if line.starts_with("[ExtractAudio]") {
        return OutputLine::Postprocessing;
    }
    OutputLine::Other
}

/// Read a stream line by line, forwarding progress and collecting the rest.
async fn pump_output<R>(reader: R, progress: mpsc::Sender<ProgressSample>) -> StreamOutput
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut output = StreamOutput::default();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Stopped reading yt-dlp output");
                break;
            }
        }

        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end();

        match classify_line(line) {
            // Samples are disposable; never stall the child on a slow consumer.
            OutputLine::Progress(sample) => {
                let _ = progress.try_send(sample);
            }
            OutputLine::Postprocessing => {
                let _ = progress.send(ProgressSample::status("postprocessing")).await;
            }
            OutputLine::File(path) => output.file = Some(path),
            OutputLine::Title(title) => output.title = Some(title),
            OutputLine::Other => output.remember(line),
        }
    }

    output
}

async fn join_output(task: Option<tokio::task::JoinHandle<StreamOutput>>) -> StreamOutput {
    match task {
        Some(task) => task.await.unwrap_or_default(),
        None => StreamOutput::default(),
    }
}

/// Parse a line produced by our `--progress-template`.
///
/// Format: `lydbot-progress:<status>:<downloaded>:<total>:<estimate>`, where
/// yt-dlp prints `NA` for unknown values. The exact total wins over the estimate.
pub fn parse_progress_line(line: &str) -> Option<ProgressSample> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = rest.split(':');

    let status = fields.next()?.trim();
    let downloaded = parse_bytes(fields.next()?).unwrap_or(0);
    let total = fields.next().and_then(parse_bytes);
    let estimate = fields.next().and_then(parse_bytes);

    if status.is_empty() {
        return None;
    }

    Some(ProgressSample::new(
        status,
        downloaded,
        total.filter(|t| *t > 0).or(estimate),
    ))
}

fn parse_bytes(field: &str) -> Option<u64> {
    let value: f64 = field.trim().parse().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value as u64)
}

/// Locate the converted file when yt-dlp did not print its path.
fn find_audio_file(dir: &Path, extension: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;

    entries.flatten().map(|e| e.path()).find(|path| {
        path.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(extension))
    })
}

/// Map yt-dlp error output onto a failure class.
///
/// Unknown failures count as network failures so they get the retry.
pub fn classify_failure(stderr: &str) -> FailureClass {
    const POSTPROCESS: &[&str] = &[
        "postprocessing:",
        "ffmpeg not found",
        "ffprobe not found",
        "ffprobe and ffmpeg not found",
        "audio conversion failed",
        "conversion failed",
    ];
    const UNAVAILABLE: &[&str] = &[
        "video unavailable",
        "private video",
        "this video is private",
        "has been removed",
        "is not available",
        "available in your country",
        "geo restrict",
        "members-only",
        "join this channel",
        "sign in to confirm your age",
        "age-restricted",
        "copyright",
        "account associated with this video has been terminated",
        "unsupported url",
        "drm protected",
    ];
    const NETWORK: &[&str] = &[
        "unable to download webpage",
        "unable to download video data",
        "http error 5",
        "http error 429",
        "connection reset",
        "connection refused",
        "timed out",
        "name or service not known",
        "temporary failure in name resolution",
        "network is unreachable",
        "ssl",
    ];

    let text = stderr.to_lowercase();
    let matches = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if matches(POSTPROCESS) {
        return FailureClass::PostprocessFailure;
    }
    if matches(UNAVAILABLE) {
        return FailureClass::Unavailable;
    }
    if !matches(NETWORK) {
        debug!("Unrecognized yt-dlp failure, treating it as a network failure");
    }
    FailureClass::NetworkFailure
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionSettings;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn test_parse_progress_line() {
        assert_eq!(
            parse_progress_line("lydbot-progress:downloading:1024:4096:NA"),
            Some(ProgressSample::new("downloading", 1024, Some(4096)))
        );
        assert_eq!(
            parse_progress_line("lydbot-progress:downloading:1024:NA:8192.5"),
            Some(ProgressSample::new("downloading", 1024, Some(8192)))
        );
        assert_eq!(
            parse_progress_line("lydbot-progress:downloading:1024:0:NA"),
            Some(ProgressSample::new("downloading", 1024, None))
        );
        assert_eq!(
            parse_progress_line("lydbot-progress:finished:4096:4096:NA"),
            Some(ProgressSample::new("finished", 4096, Some(4096)))
        );
        assert_eq!(parse_progress_line("[download]  12.5% of 3.00MiB"), None);
        assert_eq!(parse_progress_line("lydbot-progress:"), None);
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(
            classify_line("lydbot-file:/tmp/x/Song [abc].mp3"),
            OutputLine::File(PathBuf::from("/tmp/x/Song [abc].mp3"))
        );
        assert_eq!(
            classify_line("lydbot-title:Song: The Remix"),
            OutputLine::Title("Song: The Remix".to_string())
        );
        assert_eq!(
            classify_line("[ExtractAudio] Destination: /tmp/x/Song.mp3"),
            OutputLine::Postprocessing
        );
        assert_eq!(classify_line("[youtube] abc: Downloading webpage"), OutputLine::Other);
    }

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure("ERROR: [youtube] dQw4w9WgXcQ: Private video. Sign in if you've been granted access"),
            FailureClass::Unavailable
        );
        assert_eq!(
            classify_failure("ERROR: [youtube] x: The uploader has not made this video available in your country"),
            FailureClass::Unavailable
        );
        assert_eq!(
            classify_failure("ERROR: Postprocessing: audio conversion failed: Error opening output file"),
            FailureClass::PostprocessFailure
        );
        assert_eq!(
            classify_failure("ERROR: [youtube] x: Unable to download webpage: <urlopen error [Errno -3] Temporary failure in name resolution>"),
            FailureClass::NetworkFailure
        );
        assert_eq!(classify_failure("something odd happened"), FailureClass::NetworkFailure);
    }

    #[test]
    fn test_command_arguments() {
        let root = tempfile::tempdir().unwrap();
        let mut settings = ExtractionSettings::default();
        settings.cookies_file = Some("/etc/lydbot/cookies.txt".to_string());
        let config = ExtractionConfig::for_request(&settings, root.path(), Uuid::new_v4());
        let locator =
            ValidatedLocator::parse("https://youtu.be/dQw4w9WgXcQ?si=share").unwrap();

        let cmd = YtDlpExtractor::command(&locator, &config, root.path());
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(args.windows(2).any(|w| w == ["--audio-format", "mp3"]));
        assert!(args.windows(2).any(|w| w == ["--audio-quality", "320K"]));
        assert!(args.windows(2).any(|w| w == ["--cookies", "/etc/lydbot/cookies.txt"]));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert_eq!(
            args.last().map(String::as_str),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// Write an executable stand-in for yt-dlp.
        fn fake_ytdlp(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-yt-dlp");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        const WRITES_OUTPUT: &str = r#"
out=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "--output" ]; then out="$arg"; fi
  prev="$arg"
done
dir=$(dirname "$out")
echo "lydbot-progress:downloading:0:1000:NA"
echo "lydbot-progress:downloading:500:0:NA"
echo "lydbot-progress:downloading:1000:1000:NA"
echo "[ExtractAudio] Destination: $dir/Test Song [abc].mp3"
printf 'ID3 fake audio' > "$dir/Test Song [abc].mp3"
echo "lydbot-title:Test Song"
echo "lydbot-file:$dir/Test Song [abc].mp3"
"#;

        fn setup(body: &str, timeout: Duration) -> (TempDir, ExtractionConfig, ValidatedLocator) {
            let root = tempfile::tempdir().unwrap();
            let script = fake_ytdlp(root.path(), body);
            let mut settings = ExtractionSettings::default();
            settings.ytdlp_path = script.to_string_lossy().into_owned();

            let mut config =
                ExtractionConfig::for_request(&settings, &root.path().join("work"), Uuid::new_v4());
            config.timeout = timeout;
            let locator = ValidatedLocator::parse("https://youtu.be/dQw4w9WgXcQ").unwrap();
            (root, config, locator)
        }

        async fn run(
            config: &ExtractionConfig,
            locator: &ValidatedLocator,
            cancel: CancellationToken,
        ) -> (Result<Artifact, ExtractionFailure>, Vec<ProgressSample>) {
            let (tx, mut rx) = mpsc::channel(64);
            let result = YtDlpExtractor::new().extract(locator, config, tx, cancel).await;
            let mut samples = Vec::new();
            while let Ok(sample) = rx.try_recv() {
                samples.push(sample);
            }
            (result, samples)
        }

        #[tokio::test]
        async fn test_successful_extraction() {
            let (_root, config, locator) = setup(WRITES_OUTPUT, Duration::from_secs(10));

            let (result, samples) = run(&config, &locator, CancellationToken::new()).await;
            let artifact = result.unwrap();

            assert_eq!(artifact.title(), "Test Song");
            assert_eq!(artifact.file_name(), "Test Song.mp3");
            assert_eq!(artifact.byte_size(), 14);
            assert!(artifact.path().exists());

            assert!(samples.contains(&ProgressSample::new("downloading", 500, None)));
            assert!(samples.contains(&ProgressSample::status("postprocessing")));
            assert_eq!(samples.last(), Some(&ProgressSample::status("complete")));

            let path = artifact.path().to_path_buf();
            artifact.discard();
            assert!(!path.exists());
        }

        #[tokio::test]
        async fn test_failure_is_classified() {
            let (_root, config, locator) = setup(
                "echo 'ERROR: [youtube] dQw4w9WgXcQ: Video unavailable' >&2\nexit 1",
                Duration::from_secs(10),
            );

            let (result, _) = run(&config, &locator, CancellationToken::new()).await;
            assert_eq!(result.unwrap_err().class, FailureClass::Unavailable);
        }

        #[tokio::test]
        async fn test_success_without_file_is_artifact_missing() {
            let (_root, config, locator) = setup("exit 0", Duration::from_secs(10));

            let (result, _) = run(&config, &locator, CancellationToken::new()).await;
            assert_eq!(result.unwrap_err().class, FailureClass::ArtifactMissing);
        }

        #[tokio::test]
        async fn test_timeout_kills_process() {
            let (_root, config, locator) = setup("exec sleep 30", Duration::from_millis(200));

            let started = std::time::Instant::now();
            let (result, _) = run(&config, &locator, CancellationToken::new()).await;
            assert_eq!(result.unwrap_err().class, FailureClass::Timeout);
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_cancellation_kills_process() {
            let (_root, config, locator) = setup("exec sleep 30", Duration::from_secs(60));
            let cancel = CancellationToken::new();

            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                trigger.cancel();
            });

            let (result, _) = run(&config, &locator, cancel).await;
            assert_eq!(result.unwrap_err().class, FailureClass::Cancelled);
        }

        /// Whether `pid` is a live (non-zombie) process.
        #[cfg(target_os = "linux")]
        fn is_running(pid: &str) -> bool {
            std::fs::read_to_string(format!("/proc/{pid}/stat"))
                .ok()
                .and_then(|stat| stat.rsplit(')').next().map(|rest| !rest.trim_start().starts_with('Z')))
                .unwrap_or(false)
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn test_cancellation_kills_helper_processes() {
            let (root, config, locator) = setup(
                r#"sleep 30 &
echo $! > "$(dirname "$0")/helper.pid"
wait"#,
                Duration::from_secs(60),
            );
            let pid_file = root.path().join("helper.pid");
            let cancel = CancellationToken::new();

            let trigger = cancel.clone();
            let watched = pid_file.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    if watched.exists() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                trigger.cancel();
            });

            let (result, _) = run(&config, &locator, cancel).await;
            assert_eq!(result.unwrap_err().class, FailureClass::Cancelled);

            let pid = std::fs::read_to_string(&pid_file).unwrap();
            let pid = pid.trim();
            for _ in 0..100 {
                if !is_running(pid) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            panic!("helper process {pid} survived cancellation");
        }

        #[tokio::test]
        async fn test_missing_binary() {
            let root = tempfile::tempdir().unwrap();
            let mut settings = ExtractionSettings::default();
            settings.ytdlp_path = root.path().join("no-such-yt-dlp").to_string_lossy().into_owned();
            let config = ExtractionConfig::for_request(&settings, root.path(), Uuid::new_v4());
            let locator = ValidatedLocator::parse("https://youtu.be/dQw4w9WgXcQ").unwrap();

            let (result, _) = run(&config, &locator, CancellationToken::new()).await;
            assert_eq!(result.unwrap_err().class, FailureClass::Unavailable);
        }
    }
}
