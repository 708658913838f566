// Concrete resolver and mux backends

pub mod ffmpeg;
pub mod ytdlp;

pub use ffmpeg::{FfmpegMuxer, ProgressParser};
pub use ytdlp::YtDlpResolver;
