pub mod downloader;

pub use downloader::backends::{FfmpegMuxer, YtDlpResolver};
pub use downloader::{
    ByteStream, DownloadError, DownloadHooks, DownloadOptions, DownloadOutcome, DownloadProgress,
    Downloader, EncodingDescriptor, FailureKind, MergeProgress, MuxExecutor, MuxJob,
    NetworkConfig, RawFormat, SessionState, SourceResolver, StreamPath, VideoMetadata,
    VideoSummary, THROTTLE_INTERVAL,
};
