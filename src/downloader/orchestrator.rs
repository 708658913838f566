// Orchestrator - the public entry points

use std::path::PathBuf;

use tracing::info;

use super::backends::{FfmpegMuxer, YtDlpResolver};
use super::errors::DownloadError;
use super::format_selector::FormatSelector;
use super::merge::{DownloadSession, MergeCoordinator, StreamPath};
use super::models::{DownloadOptions, EncodingDescriptor, NetworkConfig};
use super::progress::DownloadHooks;
use super::traits::{MuxExecutor, SourceResolver};

/// Title and selectable qualities from one metadata lookup
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSummary {
    pub title: String,
    pub resolutions: Vec<EncodingDescriptor>,
}

/// Result of a successful download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub output: PathBuf,
    pub path: StreamPath,
    pub video_bytes: u64,
    pub audio_bytes: u64,
}

pub struct Downloader {
    resolver: Box<dyn SourceResolver>,
    muxer: Box<dyn MuxExecutor>,
    options: DownloadOptions,
}

impl Downloader {
    pub fn new(resolver: Box<dyn SourceResolver>, muxer: Box<dyn MuxExecutor>) -> Self {
        Self {
            resolver,
            muxer,
            options: DownloadOptions::default(),
        }
    }

    /// yt-dlp for metadata and URLs, ffmpeg for merging
    pub fn with_system_tools(network: NetworkConfig) -> Result<Self, DownloadError> {
        Ok(Self::new(
            Box::new(YtDlpResolver::new(network)?),
            Box::new(FfmpegMuxer::new()),
        ))
    }

    pub fn with_options(mut self, options: DownloadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn muxer(&self) -> &dyn MuxExecutor {
        self.muxer.as_ref()
    }

    /// Selectable qualities for `url`, highest first, one per label
    pub async fn get_available_resolutions(
        &self,
        url: &str,
    ) -> Result<Vec<EncodingDescriptor>, DownloadError> {
        let metadata = self.resolver.resolve_metadata(url).await?;
        FormatSelector::list_encodings(&metadata.formats)
    }

    /// Title and qualities of `url` with a single resolver call
    pub async fn get_video_summary(&self, url: &str) -> Result<VideoSummary, DownloadError> {
        let metadata = self.resolver.resolve_metadata(url).await?;
        Ok(VideoSummary {
            resolutions: FormatSelector::list_encodings(&metadata.formats)?,
            title: metadata.title,
        })
    }

    pub async fn get_video_title(&self, url: &str) -> Result<String, DownloadError> {
        self.resolver
            .resolve_metadata(url)
            .await
            .map(|m| m.title)
            .map_err(|e| DownloadError::SourceLookup(format!("Failed to get video name: {}", e)))
    }

    /// Download `quality_label` of `url` as one playable file
    pub async fn download(
        &self,
        url: &str,
        quality_label: &str,
        hooks: &DownloadHooks,
    ) -> Result<DownloadOutcome, DownloadError> {
        info!(resolver = self.resolver.name(), url, quality = quality_label, "starting download");

        let mut session = DownloadSession::new(&self.options, hooks);
        let output = MergeCoordinator::new(self.resolver.as_ref(), self.muxer.as_ref())
            .run(&mut session, url, quality_label, hooks)
            .await?;

        let (video_bytes, audio_bytes) = session.bytes();
        Ok(DownloadOutcome {
            output,
            path: session.stream_path().unwrap_or(StreamPath::Single),
            video_bytes,
            audio_bytes,
        })
    }

    /// Same as [`download`](Self::download), reduced to a flag
    ///
    /// Returns `Ok(true)` on full success. Every failure is an `Err`;
    /// `Ok(false)` is never produced.
    pub async fn download_video(
        &self,
        url: &str,
        quality_label: &str,
        hooks: &DownloadHooks,
    ) -> Result<bool, DownloadError> {
        self.download(url, quality_label, hooks).await.map(|_| true)
    }
}
