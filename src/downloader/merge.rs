// MergeCoordinator - single vs. split path, concurrent fetches, mux
//
// State machine:
//
//   Idle -> Probing -> SingleStream -> Merging(skipped) -> Finalizing -> Done
//                   \-> DualStream  -> Merging(active)  -/
//
// Failed(kind) is reachable from every non-terminal state. Temporary
// files are only removed after a successful mux; any failure leaves them
// on disk for inspection.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::errors::{DownloadError, FailureKind};
use super::fetcher::StreamFetcher;
use super::format_selector::FormatSelector;
use super::models::{DownloadOptions, DownloadProgress, MergeProgress};
use super::progress::{DownloadHooks, ProgressChannel, ThrottledChannel};
use super::traits::{MuxExecutor, MuxJob, SourceResolver};
use super::utils::SessionPaths;

/// Which acquisition path a session took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPath {
    /// One combined encoding written straight to the output
    Single,
    /// Video-only + audio-only fetched concurrently, then muxed
    Dual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Probing,
    SingleStream,
    DualStream,
    Merging { skipped: bool },
    Finalizing,
    Done,
    Failed(FailureKind),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Probing => write!(f, "probing"),
            Self::SingleStream => write!(f, "single-stream"),
            Self::DualStream => write!(f, "dual-stream"),
            Self::Merging { skipped: true } => write!(f, "merging(skipped)"),
            Self::Merging { skipped: false } => write!(f, "merging(active)"),
            Self::Finalizing => write!(f, "finalizing"),
            Self::Done => write!(f, "done"),
            Self::Failed(kind) => write!(f, "failed({})", kind),
        }
    }
}

/// State owned by one `download_video` call
pub struct DownloadSession {
    state: SessionState,
    history: Vec<SessionState>,
    path: Option<StreamPath>,
    paths: SessionPaths,
    temp_files: Vec<PathBuf>,
    video_bytes: u64,
    audio_bytes: u64,
    video: ThrottledChannel<DownloadProgress>,
    audio: ThrottledChannel<DownloadProgress>,
    merge: ThrottledChannel<MergeProgress>,
}

impl DownloadSession {
    pub fn new(options: &DownloadOptions, hooks: &DownloadHooks) -> Self {
        let interval = options.throttle_interval;
        Self {
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
            path: None,
            paths: SessionPaths::allocate(&options.output_dir, options.output_name.as_deref()),
            temp_files: Vec::new(),
            video_bytes: 0,
            audio_bytes: 0,
            video: ThrottledChannel::new(ProgressChannel::Video, hooks.video(), interval),
            audio: ThrottledChannel::new(ProgressChannel::Audio, hooks.audio(), interval),
            merge: ThrottledChannel::new(ProgressChannel::Merge, hooks.merge(), interval),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    pub fn stream_path(&self) -> Option<StreamPath> {
        self.path
    }

    pub fn output(&self) -> &Path {
        self.paths.output()
    }

    pub fn temp_files(&self) -> &[PathBuf] {
        &self.temp_files
    }

    /// Bytes fetched per channel (video, audio)
    pub fn bytes(&self) -> (u64, u64) {
        (self.video_bytes, self.audio_bytes)
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "session transition");
        self.state = next;
        self.history.push(next);
    }

    fn fail(&mut self, err: &DownloadError) {
        if self.state.is_terminal() {
            return;
        }
        self.transition(SessionState::Failed(err.kind()));

        let left: Vec<&PathBuf> = self.temp_files.iter().filter(|p| p.exists()).collect();
        if !left.is_empty() {
            warn!(files = ?left, "keeping temporary files after failure");
        }
    }
}

/// Drives one [`DownloadSession`] from probing to completion
pub struct MergeCoordinator<'a> {
    resolver: &'a dyn SourceResolver,
    muxer: &'a dyn MuxExecutor,
}

impl<'a> MergeCoordinator<'a> {
    pub fn new(resolver: &'a dyn SourceResolver, muxer: &'a dyn MuxExecutor) -> Self {
        Self { resolver, muxer }
    }

    /// Run the session; on success the output file is complete
    ///
    /// Every error moves the session to `Failed` exactly once and is
    /// returned unchanged.
    pub async fn run(
        &self,
        session: &mut DownloadSession,
        url: &str,
        quality_label: &str,
        hooks: &DownloadHooks,
    ) -> Result<PathBuf, DownloadError> {
        match self.drive(session, url, quality_label, hooks).await {
            Ok(()) => Ok(session.output().to_path_buf()),
            Err(e) => {
                session.fail(&e);
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        session: &mut DownloadSession,
        url: &str,
        quality_label: &str,
        hooks: &DownloadHooks,
    ) -> Result<(), DownloadError> {
        session.transition(SessionState::Probing);
        let metadata = self.resolver.resolve_metadata(url).await?;
        let video = FormatSelector::choose_video(&metadata.formats, quality_label)?;
        let fetcher = StreamFetcher::new(self.resolver);

        if video.has_audio {
            session.path = Some(StreamPath::Single);
            session.transition(SessionState::SingleStream);
            info!(
                quality = quality_label,
                output = %session.output().display(),
                "downloading video with audio"
            );

            let output = session.output().to_path_buf();
            session.video_bytes = fetcher
                .fetch(url, video, &output, &mut session.video, None)
                .await?;

            session.transition(SessionState::Merging { skipped: true });
        } else {
            let audio = FormatSelector::choose_audio(&metadata.formats)?;
            session.path = Some(StreamPath::Dual);
            session.transition(SessionState::DualStream);
            info!(quality = quality_label, "downloading video and audio separately");

            let video_tmp = session.paths.temp_video(video.file_ext());
            let audio_tmp = session.paths.temp_audio(audio.file_ext());
            session.temp_files = vec![video_tmp.clone(), audio_tmp.clone()];

            // Both fetches interleave on this task; the first error drops the sibling
            let on_start = || hooks.start();
            let (video_bytes, audio_bytes) = tokio::try_join!(
                fetcher.fetch(url, video, &video_tmp, &mut session.video, Some(&on_start)),
                fetcher.fetch(url, audio, &audio_tmp, &mut session.audio, None),
            )?;
            session.video_bytes = video_bytes;
            session.audio_bytes = audio_bytes;

            session.transition(SessionState::Merging { skipped: false });
            info!(muxer = self.muxer.name(), "merging video and audio");

            let job = MuxJob::copy_video_aac(video_tmp, audio_tmp, session.output().to_path_buf());
            let merge = &mut session.merge;
            self.muxer
                .mux(&job, &mut |p: MergeProgress| merge.offer(p))
                .await?;
            merge.finish();

            for tmp in &session.temp_files {
                if let Err(e) = tokio::fs::remove_file(tmp).await {
                    warn!(file = %tmp.display(), error = %e, "failed to remove temporary file");
                }
            }
        }

        session.transition(SessionState::Finalizing);
        info!(output = %session.output().display(), "download complete");
        hooks.end();
        session.transition(SessionState::Done);
        Ok(())
    }
}
