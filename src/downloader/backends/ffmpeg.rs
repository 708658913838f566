// ffmpeg MuxExecutor
//
// Progress is read from `-progress pipe:1`, which prints key=value lines
// in blocks terminated by `progress=continue` (or `progress=end`).
// stderr is kept for the error report; the first `Duration:` it prints
// belongs to the video input and is the total for merge percentages.

use std::process::Stdio;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command as TokioCommand};
use tokio::sync::watch;
use tracing::debug;

use crate::downloader::errors::DownloadError;
use crate::downloader::models::MergeProgress;
use crate::downloader::traits::{MuxExecutor, MuxJob};
use crate::downloader::utils::find_binary;

lazy_static::lazy_static! {
    static ref BITRATE_RE: Regex = Regex::new(r"^(\d+(?:\.\d+)?)\s*kbits/s$").unwrap();
    static ref DURATION_RE: Regex =
        Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2})(?:\.(\d+))?").unwrap();
}

pub struct FfmpegMuxer {
    ffmpeg_bin: String,
}

impl FfmpegMuxer {
    pub fn new() -> Self {
        Self {
            ffmpeg_bin: find_binary("ffmpeg", "FFMPEG_PATH"),
        }
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: path.into(),
        }
    }

    fn build_args(job: &MuxJob) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            job.video_path.to_string_lossy().to_string(),
            "-i".to_string(),
            job.audio_path.to_string_lossy().to_string(),
            "-c:v".to_string(),
            job.video_codec.clone(),
            "-c:a".to_string(),
            job.audio_codec.clone(),
            "-progress".to_string(),
            "pipe:1".to_string(),
            job.output_path.to_string_lossy().to_string(),
        ]
    }
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MuxExecutor for FfmpegMuxer {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn is_available(&self) -> bool {
        match TokioCommand::new(&self.ffmpeg_bin)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }

    async fn mux(
        &self,
        job: &MuxJob,
        on_progress: &mut (dyn FnMut(MergeProgress) + Send),
    ) -> Result<(), DownloadError> {
        let args = Self::build_args(job);
        debug!(program = %self.ffmpeg_bin, args = %args.join(" "), "spawning");

        // Dropping this future kills ffmpeg
        let mut child = TokioCommand::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DownloadError::Merge(format!("Failed to start ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::Merge("Failed to capture ffmpeg stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::Merge("Failed to capture ffmpeg stderr".to_string()))?;

        let (duration_tx, duration_rx) = watch::channel(None);
        let stderr_task = tokio::spawn(collect_stderr(stderr, duration_tx));

        let mut parser = ProgressParser::default();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| DownloadError::Merge(format!("Failed to read ffmpeg progress: {}", e)))?
        {
            if let Some(mut progress) = parser.feed_line(&line) {
                progress.total_duration_us = *duration_rx.borrow();
                on_progress(progress);
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DownloadError::Merge(format!("Failed to wait for ffmpeg: {}", e)))?;
        let stderr_output = stderr_task.await.unwrap_or_default();

        if status.success() {
            return Ok(());
        }

        Err(DownloadError::Merge(format!(
            "ffmpeg exited with {}: {}",
            status,
            stderr_tail(&stderr_output, 3)
        )))
    }
}

/// Read stderr to the end, publishing the first input duration
///
/// Lines are decoded lossily; ffmpeg echoes paths and tags in whatever
/// encoding they were given.
async fn collect_stderr(stderr: ChildStderr, duration: watch::Sender<Option<u64>>) -> String {
    let mut segments = BufReader::new(stderr).split(b'\n');
    let mut lines = Vec::new();

    loop {
        match segments.next_segment().await {
            Ok(Some(raw)) => {
                let line = String::from_utf8_lossy(&raw).into_owned();
                let unset = duration.borrow().is_none();
                if unset {
                    if let Some(us) = parse_duration_us(&line) {
                        let _ = duration.send(Some(us));
                    }
                }
                lines.push(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "stopped reading ffmpeg stderr");
                break;
            }
        }
    }

    lines.join("\n")
}

/// `  Duration: 00:01:02.50, start: ...` -> 62_500_000
fn parse_duration_us(line: &str) -> Option<u64> {
    let caps = DURATION_RE.captures(line)?;
    let hours: u64 = caps[1].parse().ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: u64 = caps[3].parse().ok()?;
    let frac_us = caps.get(4).map_or(0, |m| {
        let digits: String = m.as_str().chars().chain("000000".chars()).take(6).collect();
        digits.parse().unwrap_or(0)
    });
    Some(((hours * 60 + minutes) * 60 + seconds) * 1_000_000 + frac_us)
}

/// Last `n` non-empty lines, oldest first
fn stderr_tail(stderr: &str, n: usize) -> String {
    let mut tail: Vec<&str> = stderr
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(n)
        .collect();
    tail.reverse();
    if tail.is_empty() {
        "no output".to_string()
    } else {
        tail.join(" | ")
    }
}

/// Accumulates `-progress` key=value lines into [`MergeProgress`] records
#[derive(Debug, Default)]
pub struct ProgressParser {
    current: MergeProgress,
}

impl ProgressParser {
    /// Feed one line; a completed block yields a record
    pub fn feed_line(&mut self, line: &str) -> Option<MergeProgress> {
        let (key, value) = line.split_once('=')?;
        let value = value.trim();

        match key.trim() {
            "frame" => {
                if let Ok(frames) = value.parse() {
                    self.current.frames_processed = frames;
                }
            }
            "fps" => {
                if let Ok(fps) = value.parse() {
                    self.current.current_fps = fps;
                }
            }
            "bitrate" => {
                if let Some(caps) = BITRATE_RE.captures(value) {
                    self.current.current_bitrate_kbps = caps[1].parse().unwrap_or(0.0);
                }
            }
            "total_size" => {
                if let Ok(size) = value.parse() {
                    self.current.output_size_bytes = size;
                }
            }
            "out_time_us" => {
                if let Ok(us) = value.parse() {
                    self.current.elapsed_us = us;
                }
            }
            "out_time" => {
                if let Some(mark) = timemark(value) {
                    self.current.elapsed_timemark = mark;
                }
            }
            "progress" => return Some(self.current.clone()),
            _ => {}
        }

        None
    }
}

/// "00:01:02.345678" -> "00:01:02.34"
fn timemark(out_time: &str) -> Option<String> {
    if out_time.starts_with('-') || out_time == "N/A" {
        return None;
    }
    let (whole, frac) = out_time.split_once('.').unwrap_or((out_time, ""));
    if whole.split(':').count() != 3 {
        return None;
    }
    let mut cs: String = frac.chars().take(2).collect();
    while cs.len() < 2 {
        cs.push('0');
    }
    Some(format!("{}.{}", whole, cs))
}
