// Downloader module - resolve, fetch, merge

pub mod backends;
pub mod errors;
pub mod fetcher;
pub mod format_selector;
pub mod merge;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod traits;
pub mod utils;

pub use errors::{DownloadError, FailureKind};
pub use format_selector::FormatSelector;
pub use merge::{DownloadSession, MergeCoordinator, SessionState, StreamPath};
pub use models::{
    DownloadOptions, DownloadProgress, EncodingDescriptor, MergeProgress, NetworkConfig,
    RawFormat, VideoMetadata, THROTTLE_INTERVAL,
};
pub use orchestrator::{DownloadOutcome, Downloader, VideoSummary};
pub use progress::{DownloadHooks, ProgressChannel};
pub use traits::{ByteStream, MuxExecutor, MuxJob, SourceResolver};
