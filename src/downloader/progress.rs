// Progress channels and throttling
//
// Each of video/audio/merge is a named channel carrying a typed record.
// A channel without a subscriber simply drops what it is given. The
// throttle state lives in the session that owns the channel, never in
// the Downloader, so concurrent downloads cannot leak into each other.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::models::{DownloadProgress, MergeProgress};

/// Logical progress channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressChannel {
    Video,
    Audio,
    Merge,
}

impl fmt::Display for ProgressChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

type Subscriber<T> = Arc<dyn Fn(T) + Send + Sync>;
type Hook = Arc<dyn Fn() + Send + Sync>;

/// A channel with at most one subscriber
pub struct Channel<T> {
    subscriber: Option<Subscriber<T>>,
}

impl<T> Channel<T> {
    pub fn subscribed(f: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            subscriber: Some(Arc::new(f)),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscriber.is_some()
    }

    pub fn emit(&self, event: T) {
        if let Some(subscriber) = &self.subscriber {
            subscriber(event);
        }
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self { subscriber: None }
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            subscriber: self.subscriber.clone(),
        }
    }
}

/// Minimum-interval gate for one channel
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_forwarded: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_forwarded: None,
        }
    }

    /// Admit the first event, then only events at least `interval` after the last admitted one
    pub fn admit(&mut self, now: Instant) -> bool {
        let open = self
            .last_forwarded
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if open {
            self.last_forwarded = Some(now);
        }
        open
    }

    fn mark(&mut self, now: Instant) {
        self.last_forwarded = Some(now);
    }
}

/// A channel behind a [`Throttle`]
///
/// The most recent event that was held back is kept, and [`finish`](Self::finish)
/// forwards it so the subscriber always sees the end-of-stream value.
pub struct ThrottledChannel<T> {
    name: ProgressChannel,
    channel: Channel<T>,
    throttle: Throttle,
    pending: Option<T>,
    forwarded: u64,
}

impl<T> ThrottledChannel<T> {
    pub fn new(name: ProgressChannel, channel: Channel<T>, interval: Duration) -> Self {
        Self {
            name,
            channel,
            throttle: Throttle::new(interval),
            pending: None,
            forwarded: 0,
        }
    }

    pub fn name(&self) -> ProgressChannel {
        self.name
    }

    /// Number of events delivered to the subscriber so far
    #[cfg(test)]
    pub(crate) fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub fn offer(&mut self, event: T) {
        self.offer_at(event, Instant::now());
    }

    pub fn offer_at(&mut self, event: T, now: Instant) {
        if self.throttle.admit(now) {
            self.pending = None;
            self.deliver(event);
        } else {
            self.pending = Some(event);
        }
    }

    /// Flush the held-back final event, if any
    pub fn finish(&mut self) {
        self.finish_at(Instant::now());
    }

    pub fn finish_at(&mut self, now: Instant) {
        if let Some(event) = self.pending.take() {
            self.throttle.mark(now);
            self.deliver(event);
        }
    }

    fn deliver(&mut self, event: T) {
        self.forwarded += 1;
        self.channel.emit(event);
    }
}

/// Caller-supplied lifecycle callbacks and progress subscribers
///
/// Every hook is optional. Build with the `on_*` methods:
///
/// ```
/// use youtube_fetch_lib::DownloadHooks;
///
/// let hooks = DownloadHooks::default()
///     .on_video_progress(|p| println!("video {} bytes", p.downloaded_bytes))
///     .on_end(|| println!("done"));
/// ```
#[derive(Clone, Default)]
pub struct DownloadHooks {
    start: Option<Hook>,
    video: Channel<DownloadProgress>,
    audio: Channel<DownloadProgress>,
    merge: Channel<MergeProgress>,
    end: Option<Hook>,
}

impl DownloadHooks {
    /// Fires once, on the split path, when the video stream becomes readable
    pub fn on_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.start = Some(Arc::new(f));
        self
    }

    pub fn on_video_progress(
        mut self,
        f: impl Fn(DownloadProgress) + Send + Sync + 'static,
    ) -> Self {
        self.video = Channel::subscribed(f);
        self
    }

    pub fn on_audio_progress(
        mut self,
        f: impl Fn(DownloadProgress) + Send + Sync + 'static,
    ) -> Self {
        self.audio = Channel::subscribed(f);
        self
    }

    pub fn on_merge_progress(mut self, f: impl Fn(MergeProgress) + Send + Sync + 'static) -> Self {
        self.merge = Channel::subscribed(f);
        self
    }

    /// Fires once, right before a successful download returns
    pub fn on_end(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.end = Some(Arc::new(f));
        self
    }

    pub(crate) fn start(&self) {
        if let Some(f) = &self.start {
            f();
        }
    }

    pub(crate) fn end(&self) {
        if let Some(f) = &self.end {
            f();
        }
    }

    pub(crate) fn video(&self) -> Channel<DownloadProgress> {
        self.video.clone()
    }

    pub(crate) fn audio(&self) -> Channel<DownloadProgress> {
        self.audio.clone()
    }

    pub(crate) fn merge(&self) -> Channel<MergeProgress> {
        self.merge.clone()
    }
}

impl fmt::Debug for DownloadHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadHooks")
            .field("start", &self.start.is_some())
            .field("video", &self.video.is_subscribed())
            .field("audio", &self.audio.is_subscribed())
            .field("merge", &self.merge.is_subscribed())
            .field("end", &self.end.is_some())
            .finish()
    }
}
