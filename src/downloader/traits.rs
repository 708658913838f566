// Collaborator trait definitions

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use super::errors::DownloadError;
use super::models::{MergeProgress, RawFormat, VideoMetadata};

/// Raw bytes of one encoding, plus its size when the source announces it
pub struct ByteStream {
    pub total_bytes: Option<u64>,
    pub chunks: BoxStream<'static, Result<Bytes, DownloadError>>,
}

/// Trait for metadata and byte sources
#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// Name of the resolver (for logging)
    fn name(&self) -> &'static str;

    /// Resolve title and raw formats for a URL
    async fn resolve_metadata(&self, url: &str) -> Result<VideoMetadata, DownloadError>;

    /// Open a byte stream for one format of `url`
    async fn open_read_stream(
        &self,
        url: &str,
        format: &RawFormat,
    ) -> Result<ByteStream, DownloadError>;
}

/// Inputs and codec options for one mux invocation
#[derive(Debug, Clone, PartialEq)]
pub struct MuxJob {
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
    pub video_codec: String,
    pub audio_codec: String,
}

impl MuxJob {
    /// Copy the video stream unchanged and re-encode audio to AAC
    pub fn copy_video_aac(video_path: PathBuf, audio_path: PathBuf, output_path: PathBuf) -> Self {
        Self {
            video_path,
            audio_path,
            output_path,
            video_codec: "copy".to_string(),
            audio_codec: "aac".to_string(),
        }
    }
}

/// Trait for external mux implementations
#[async_trait]
pub trait MuxExecutor: Send + Sync {
    /// Name of the executor (for logging)
    fn name(&self) -> &'static str;

    /// Check if the underlying tool can be run
    async fn is_available(&self) -> bool;

    /// Run the mux to completion, reporting progress as it goes
    async fn mux(
        &self,
        job: &MuxJob,
        on_progress: &mut (dyn FnMut(MergeProgress) + Send),
    ) -> Result<(), DownloadError>;
}
