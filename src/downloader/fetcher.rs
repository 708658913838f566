// StreamFetcher - pulls one encoding into a local file

use std::path::Path;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::errors::DownloadError;
use super::models::{DownloadProgress, RawFormat};
use super::progress::ThrottledChannel;
use super::traits::SourceResolver;

/// Streams the bytes of one selected encoding to a sink file
pub struct StreamFetcher<'a> {
    resolver: &'a dyn SourceResolver,
}

impl<'a> StreamFetcher<'a> {
    pub fn new(resolver: &'a dyn SourceResolver) -> Self {
        Self { resolver }
    }

    /// Fetch `format` of `url` into `sink`, returning the byte count
    ///
    /// Cumulative progress goes to `progress` after every chunk; the
    /// channel is finished at end-of-stream so the last value is always
    /// delivered. `on_readable` runs once, when the first chunk arrives.
    /// The sink handle is owned by this future and closes on every exit
    /// path, including when the future is dropped.
    pub async fn fetch(
        &self,
        url: &str,
        format: &RawFormat,
        sink: &Path,
        progress: &mut ThrottledChannel<DownloadProgress>,
        on_readable: Option<&(dyn Fn() + Send + Sync)>,
    ) -> Result<u64, DownloadError> {
        let channel = progress.name();
        debug!(
            resolver = self.resolver.name(),
            %channel,
            format_id = %format.format_id,
            sink = %sink.display(),
            "opening stream"
        );

        let mut stream = self
            .resolver
            .open_read_stream(url, format)
            .await
            .map_err(|e| match e {
                DownloadError::Transfer(msg) => DownloadError::transfer(channel, msg),
                other => other,
            })?;
        let total_bytes = stream.total_bytes.or(format.content_length);

        let mut file = tokio::fs::File::create(sink)
            .await
            .map_err(|e| DownloadError::transfer(sink.display(), e))?;

        let mut downloaded: u64 = 0;
        let mut readable = on_readable;

        while let Some(chunk) = stream.chunks.next().await {
            let chunk = chunk.map_err(|e| match e {
                DownloadError::Transfer(msg) => DownloadError::transfer(channel, msg),
                other => other,
            })?;

            if let Some(f) = readable.take() {
                f();
            }

            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::transfer(sink.display(), e))?;
            downloaded += chunk.len() as u64;

            progress.offer(DownloadProgress {
                downloaded_bytes: downloaded,
                total_bytes,
            });
        }

        file.flush()
            .await
            .map_err(|e| DownloadError::transfer(sink.display(), e))?;

        // An empty stream still reports its end
        if downloaded == 0 {
            progress.offer(DownloadProgress {
                downloaded_bytes: 0,
                total_bytes,
            });
        }
        progress.finish();

        info!(%channel, bytes = downloaded, sink = %sink.display(), "stream finished");
        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::VideoMetadata;
    use crate::downloader::progress::{Channel, ProgressChannel};
    use crate::downloader::traits::ByteStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct ChunkSource {
        chunks: Vec<Result<&'static [u8], &'static str>>,
        total: Option<u64>,
    }

    #[async_trait]
    impl SourceResolver for ChunkSource {
        fn name(&self) -> &'static str {
            "chunks"
        }

        async fn resolve_metadata(&self, _url: &str) -> Result<VideoMetadata, DownloadError> {
            unreachable!("fetch never resolves metadata")
        }

        async fn open_read_stream(
            &self,
            _url: &str,
            _format: &RawFormat,
        ) -> Result<ByteStream, DownloadError> {
            let items: Vec<Result<Bytes, DownloadError>> = self
                .chunks
                .iter()
                .map(|c| match c {
                    Ok(b) => Ok(Bytes::from_static(b)),
                    Err(e) => Err(DownloadError::Transfer(e.to_string())),
                })
                .collect();
            Ok(ByteStream {
                total_bytes: self.total,
                chunks: futures_util::stream::iter(items).boxed(),
            })
        }
    }

    type Seen = Arc<Mutex<Vec<DownloadProgress>>>;

    fn recording(interval: Duration) -> (ThrottledChannel<DownloadProgress>, Seen) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let channel = Channel::subscribed(move |p| sink.lock().unwrap().push(p));
        (ThrottledChannel::new(ProgressChannel::Video, channel, interval), seen)
    }

    #[tokio::test]
    async fn test_fetch_writes_and_reports_cumulative_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("out.bin");
        let source = ChunkSource {
            chunks: vec![Ok(b"abc"), Ok(b"de"), Ok(b"fghij")],
            total: Some(10),
        };
        let (mut progress, seen) = recording(Duration::ZERO);
        let starts = AtomicUsize::new(0);
        let on_readable = || {
            starts.fetch_add(1, Ordering::SeqCst);
        };

        let bytes = StreamFetcher::new(&source)
            .fetch("u", &RawFormat::default(), &sink, &mut progress, Some(&on_readable))
            .await
            .unwrap();

        assert_eq!(bytes, 10);
        assert_eq!(std::fs::read(&sink).unwrap(), b"abcdefghij");
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        let counts: Vec<u64> = seen.lock().unwrap().iter().map(|p| p.downloaded_bytes).collect();
        assert_eq!(counts, vec![3, 5, 10]);
        assert!(seen.lock().unwrap().iter().all(|p| p.total_bytes == Some(10)));
    }

    #[tokio::test]
    async fn test_fetch_always_delivers_final_count() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("out.bin");
        let source = ChunkSource {
            chunks: vec![Ok(b"a"), Ok(b"b"), Ok(b"c")],
            total: None,
        };
        let (mut progress, seen) = recording(Duration::from_secs(60));

        StreamFetcher::new(&source)
            .fetch("u", &RawFormat::default(), &sink, &mut progress, None)
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].downloaded_bytes, 1);
        assert_eq!(seen[1], DownloadProgress { downloaded_bytes: 3, total_bytes: None });
    }

    #[tokio::test]
    async fn test_fetch_empty_stream_reports_end() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("empty.bin");
        let source = ChunkSource { chunks: vec![], total: Some(0) };
        let (mut progress, seen) = recording(Duration::from_secs(60));

        let bytes = StreamFetcher::new(&source)
            .fetch("u", &RawFormat::default(), &sink, &mut progress, None)
            .await
            .unwrap();

        assert_eq!(bytes, 0);
        assert!(sink.exists());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_source_error_is_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("broken.bin");
        let source = ChunkSource {
            chunks: vec![Ok(b"abc"), Err("connection reset")],
            total: Some(10),
        };
        let (mut progress, _seen) = recording(Duration::ZERO);

        let err = StreamFetcher::new(&source)
            .fetch("u", &RawFormat::default(), &sink, &mut progress, None)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Transfer(ref m) if m.contains("connection reset")));
        // partial data stays on disk
        assert_eq!(std::fs::read(&sink).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_fetch_sink_error_is_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("missing-dir").join("out.bin");
        let source = ChunkSource { chunks: vec![Ok(b"abc")], total: None };
        let (mut progress, _seen) = recording(Duration::ZERO);

        let err = StreamFetcher::new(&source)
            .fetch("u", &RawFormat::default(), &sink, &mut progress, None)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Transfer(_)));
    }
}
