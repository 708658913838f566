// Common data models for the download pipeline

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Minimum gap between two forwarded progress events on one channel
pub const THROTTLE_INTERVAL: Duration = Duration::from_millis(300);

/// One selectable quality, as presented to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingDescriptor {
    /// Unique key (e.g., "1080p", "720p60")
    pub quality_label: String,
    /// Frames per second, when the source reports it
    pub frame_rate: Option<f32>,
    /// Whether this encoding already carries an audio track
    pub has_audio: bool,
}

/// Raw format entry as reported by a [`SourceResolver`](super::traits::SourceResolver)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFormat {
    /// Source-specific format ID (e.g., "137", "140")
    pub format_id: String,
    /// Quality label; present only on genuine video encodings
    pub quality_label: Option<String>,
    /// Frames per second
    pub fps: Option<f32>,
    pub has_video: bool,
    pub has_audio: bool,
    /// Video bitrate in kbps
    pub video_bitrate: Option<f32>,
    /// Audio bitrate in kbps
    pub audio_bitrate: Option<f32>,
    /// Container extension (mp4, webm, m4a)
    pub ext: String,
    /// Size in bytes when known up front
    pub content_length: Option<u64>,
    /// Direct media URL
    pub url: Option<String>,
    /// Headers the source requires when fetching `url`
    #[serde(default)]
    pub http_headers: HashMap<String, String>,
}

impl RawFormat {
    pub fn is_video_only(&self) -> bool {
        self.has_video && !self.has_audio
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    /// Extension to use for a local copy of this format
    pub fn file_ext(&self) -> &str {
        if self.ext.is_empty() {
            "mp4"
        } else {
            &self.ext
        }
    }
}

/// Video metadata resolved from a source URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub formats: Vec<RawFormat>,
}

/// Byte-count progress of one fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    /// Cumulative bytes written so far
    pub downloaded_bytes: u64,
    /// Total size; `None` for chunked sources
    pub total_bytes: Option<u64>,
}

impl DownloadProgress {
    /// Completion ratio in `0.0..=1.0`, when the total is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some((self.downloaded_bytes as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Progress reported by the external mux process
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeProgress {
    pub frames_processed: u64,
    pub current_fps: f32,
    pub current_bitrate_kbps: f32,
    pub output_size_bytes: u64,
    /// Elapsed output time (HH:MM:SS.cc)
    pub elapsed_timemark: String,
    /// Elapsed output time in microseconds
    pub elapsed_us: u64,
    /// Duration of the video input, once the muxer has reported it
    pub total_duration_us: Option<u64>,
}

impl MergeProgress {
    /// Completion ratio in `0.0..=1.0`, when the input duration is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total_duration_us {
            Some(0) | None => None,
            Some(total) => Some((self.elapsed_us as f64 / total as f64).min(1.0)),
        }
    }
}

/// Download options
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Directory the output (and temporary files) are written to
    pub output_dir: PathBuf,
    /// Explicit output file name; a timestamped name is used when absent
    pub output_name: Option<String>,
    /// Per-channel progress throttle
    pub throttle_interval: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            output_name: None,
            throttle_interval: THROTTLE_INTERVAL,
        }
    }
}

impl DownloadOptions {
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_output_name(mut self, name: Option<String>) -> Self {
        self.output_name = name;
        self
    }

    pub fn with_throttle_interval(mut self, interval: Duration) -> Self {
        self.throttle_interval = interval;
        self
    }
}

/// Network configuration for backends
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Proxy URL (e.g., "socks5://127.0.0.1:1080")
    pub proxy: Option<String>,

    /// Timeout in seconds
    pub timeout: Option<u32>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout: Some(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction() {
        let p = DownloadProgress { downloaded_bytes: 50, total_bytes: Some(200) };
        assert_eq!(p.fraction(), Some(0.25));

        let chunked = DownloadProgress { downloaded_bytes: 50, total_bytes: None };
        assert_eq!(chunked.fraction(), None);

        let empty = DownloadProgress { downloaded_bytes: 0, total_bytes: Some(0) };
        assert_eq!(empty.fraction(), Some(1.0));
    }

    #[test]
    fn test_merge_fraction() {
        let mut p = MergeProgress {
            elapsed_us: 15_000_000,
            ..Default::default()
        };
        assert_eq!(p.fraction(), None);

        p.total_duration_us = Some(60_000_000);
        assert_eq!(p.fraction(), Some(0.25));

        // audio longer than video runs past the video duration
        p.elapsed_us = 61_000_000;
        assert_eq!(p.fraction(), Some(1.0));

        p.total_duration_us = Some(0);
        assert_eq!(p.fraction(), None);
    }

    #[test]
    fn test_descriptor_serializes_camel_case() {
        let d = EncodingDescriptor {
            quality_label: "1080p".to_string(),
            frame_rate: Some(30.0),
            has_audio: false,
        };
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["qualityLabel"], "1080p");
        assert_eq!(json["hasAudio"], false);
    }
}
