// yt-dlp SourceResolver
//
// Metadata comes from `yt-dlp --dump-json`; bytes are pulled straight
// from the per-format URL it reports, with the headers it asks for.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::downloader::errors::DownloadError;
use crate::downloader::models::{NetworkConfig, RawFormat, VideoMetadata};
use crate::downloader::traits::{ByteStream, SourceResolver};
use crate::downloader::utils::{
    find_binary, get_proxy_args, get_timeout_args, run_output_with_timeout,
};

const LOOKUP_TIMEOUT_SECS: u64 = 60;

lazy_static::lazy_static! {
    static ref RESOLUTION_LABEL_RE: Regex = Regex::new(r"^\d+p").unwrap();
}

pub struct YtDlpResolver {
    ytdlp_bin: String,
    network: NetworkConfig,
    client: reqwest::Client,
}

impl YtDlpResolver {
    pub fn new(network: NetworkConfig) -> Result<Self, DownloadError> {
        let mut builder = reqwest::Client::builder();

        if let Some(secs) = network.timeout {
            builder = builder.connect_timeout(Duration::from_secs(secs as u64));
        }

        if let Some(proxy_url) = network.proxy.as_deref() {
            match reqwest::Proxy::all(proxy_url) {
                Ok(proxy) => builder = builder.proxy(proxy),
                Err(e) => {
                    warn!(proxy = proxy_url, error = %e, "invalid proxy URL, connecting directly")
                }
            }
        }

        let client = builder
            .build()
            .map_err(|e| DownloadError::Transfer(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            ytdlp_bin: find_binary("yt-dlp", "YTDLP_PATH"),
            network,
            client,
        })
    }

    fn build_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(get_timeout_args(&self.network));
        args.extend(get_proxy_args(&self.network));
        args.push(url.to_string());
        args
    }
}

#[async_trait]
impl SourceResolver for YtDlpResolver {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn resolve_metadata(&self, url: &str) -> Result<VideoMetadata, DownloadError> {
        let args = self.build_args(url);
        let output = run_output_with_timeout(&self.ytdlp_bin, args, LOOKUP_TIMEOUT_SECS)
            .await
            .map_err(DownloadError::SourceLookup)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("yt-dlp failed without output")
                .trim()
                .to_string();
            return Err(DownloadError::SourceLookup(message));
        }

        parse_metadata(&output.stdout)
    }

    async fn open_read_stream(
        &self,
        _url: &str,
        format: &RawFormat,
    ) -> Result<ByteStream, DownloadError> {
        let media_url = format.url.as_deref().ok_or_else(|| {
            DownloadError::Transfer(format!("format {} has no direct URL", format.format_id))
        })?;

        debug!(format_id = %format.format_id, "requesting media");
        let response = self
            .client
            .get(media_url)
            .headers(build_headers(&format.http_headers))
            .send()
            .await?
            .error_for_status()?;

        Ok(ByteStream {
            total_bytes: response.content_length(),
            chunks: response
                .bytes_stream()
                .map(|chunk| chunk.map_err(DownloadError::from))
                .boxed(),
        })
    }
}

fn build_headers(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            map.insert(name, value);
        }
    }
    map
}

/// Parse `--dump-json` output into title and directly fetchable formats
pub fn parse_metadata(stdout: &[u8]) -> Result<VideoMetadata, DownloadError> {
    let json: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| DownloadError::SourceLookup(format!("Invalid JSON from yt-dlp: {}", e)))?;

    let formats_array = json["formats"]
        .as_array()
        .ok_or_else(|| DownloadError::SourceLookup("No formats array in JSON".to_string()))?;

    let formats = formats_array
        .iter()
        .filter(|f| is_direct_protocol(f["protocol"].as_str()))
        .map(parse_format)
        .collect();

    Ok(VideoMetadata {
        title: json["title"].as_str().unwrap_or("Unknown").to_string(),
        formats,
    })
}

// Manifest and storyboard formats cannot be fetched with a plain GET
fn is_direct_protocol(protocol: Option<&str>) -> bool {
    matches!(protocol, None | Some("http") | Some("https"))
}

fn parse_format(f: &serde_json::Value) -> RawFormat {
    let codec_present = |key: &str| f[key].as_str().map_or(false, |c| c != "none" && !c.is_empty());
    let has_video = codec_present("vcodec");
    let has_audio = codec_present("acodec");
    let tbr = f["tbr"].as_f64().map(|t| t as f32);

    let quality_label = if has_video {
        quality_label(f["format_note"].as_str(), f["height"].as_u64())
    } else {
        None
    };

    let http_headers = f["http_headers"]
        .as_object()
        .map(|h| {
            h.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    RawFormat {
        format_id: f["format_id"].as_str().unwrap_or("").to_string(),
        quality_label,
        fps: f["fps"].as_f64().map(|fps| fps as f32),
        has_video,
        has_audio,
        video_bitrate: f["vbr"].as_f64().map(|v| v as f32).or(if has_video { tbr } else { None }),
        audio_bitrate: f["abr"].as_f64().map(|a| a as f32).or(if has_video { None } else { tbr }),
        ext: f["ext"].as_str().unwrap_or("").to_string(),
        content_length: f["filesize"].as_u64(),
        url: f["url"].as_str().map(|s| s.to_string()),
        http_headers,
    }
}

/// `format_note` when it reads like "1080p60", otherwise "<height>p"
fn quality_label(format_note: Option<&str>, height: Option<u64>) -> Option<String> {
    match format_note {
        Some(note) if RESOLUTION_LABEL_RE.is_match(note) => Some(note.to_string()),
        _ => height.map(|h| format!("{}p", h)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "id": "abc",
        "title": "Sample clip",
        "formats": [
            {"format_id": "sb0", "format_note": "storyboard", "vcodec": "none", "acodec": "none", "protocol": "mhtml", "ext": "mhtml"},
            {"format_id": "140", "format_note": "medium", "vcodec": "none", "acodec": "mp4a.40.2", "abr": 129.5, "ext": "m4a", "protocol": "https", "url": "https://media/140", "filesize": 1000},
            {"format_id": "18", "format_note": "360p", "height": 360, "fps": 30, "vcodec": "avc1.42001E", "acodec": "mp4a.40.2", "tbr": 500.0, "ext": "mp4", "protocol": "https", "url": "https://media/18"},
            {"format_id": "299", "format_note": "1080p60", "height": 1080, "fps": 60, "vcodec": "avc1.64002a", "acodec": "none", "vbr": 4500.0, "ext": "mp4", "protocol": "https", "url": "https://media/299",
             "http_headers": {"User-Agent": "Mozilla/5.0", "Accept": "*/*"}},
            {"format_id": "400", "height": 1440, "vcodec": "av01.0.12M.08", "acodec": "none", "ext": "mp4", "protocol": "https", "url": "https://media/400"},
            {"format_id": "hls-1080", "format_note": "1080p", "height": 1080, "vcodec": "avc1", "acodec": "mp4a", "protocol": "m3u8_native", "url": "https://media/hls"}
        ]
    }"#;

    #[test]
    fn test_parse_metadata() {
        let meta = parse_metadata(SAMPLE.as_bytes()).unwrap();

        assert_eq!(meta.title, "Sample clip");
        let ids: Vec<&str> = meta.formats.iter().map(|f| f.format_id.as_str()).collect();
        assert_eq!(ids, vec!["140", "18", "299", "400"]);
    }

    #[test]
    fn test_parse_format_flags_and_labels() {
        let meta = parse_metadata(SAMPLE.as_bytes()).unwrap();
        let by_id = |id: &str| meta.formats.iter().find(|f| f.format_id == id).unwrap();

        let audio = by_id("140");
        assert!(audio.is_audio_only());
        assert_eq!(audio.quality_label, None);
        assert_eq!(audio.audio_bitrate, Some(129.5));
        assert_eq!(audio.content_length, Some(1000));

        let combined = by_id("18");
        assert!(combined.has_video && combined.has_audio);
        assert_eq!(combined.quality_label.as_deref(), Some("360p"));
        assert_eq!(combined.video_bitrate, Some(500.0));

        let hfr = by_id("299");
        assert!(hfr.is_video_only());
        assert_eq!(hfr.quality_label.as_deref(), Some("1080p60"));
        assert_eq!(hfr.fps, Some(60.0));
        assert_eq!(hfr.http_headers.get("Accept").map(String::as_str), Some("*/*"));

        assert_eq!(by_id("400").quality_label.as_deref(), Some("1440p"));
    }

    #[test]
    fn test_parse_metadata_rejects_garbage() {
        assert!(matches!(
            parse_metadata(b"not json"),
            Err(DownloadError::SourceLookup(_))
        ));
        assert!(matches!(
            parse_metadata(br#"{"title": "x"}"#),
            Err(DownloadError::SourceLookup(_))
        ));
    }

    #[test]
    fn test_build_headers_skips_invalid() {
        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), "Mozilla/5.0".to_string());
        headers.insert("Bad Header".to_string(), "x".to_string());

        let map = build_headers(&headers);

        assert_eq!(map.len(), 1);
        assert_eq!(map["user-agent"], "Mozilla/5.0");
    }

    #[test]
    fn test_build_args_include_network() {
        let resolver = YtDlpResolver::new(NetworkConfig {
            proxy: Some("socks5://127.0.0.1:1080".to_string()),
            timeout: Some(20),
        })
        .unwrap();

        let args = resolver.build_args("https://youtu.be/x");

        assert_eq!(args[0], "--dump-json");
        assert!(args.windows(2).any(|w| w == ["--socket-timeout", "20"]));
        assert!(args.windows(2).any(|w| w == ["--proxy", "socks5://127.0.0.1:1080"]));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/x"));
    }
}
