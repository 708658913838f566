// FormatSelector - catalog and encoding selection
//
// Converts raw formats from a SourceResolver into the caller-facing list
// of qualities, and picks the concrete encodings a download will fetch:
// - Catalog: labelled video encodings, one per label, highest first
// - Video: best encoding carrying the requested label
// - Audio: best audio-only encoding (split path)

use std::cmp::Ordering;
use std::collections::HashSet;

use super::errors::DownloadError;
use super::models::{EncodingDescriptor, RawFormat};

/// Format selector with catalog normalization and stream choice
pub struct FormatSelector;

impl FormatSelector {
    /// Build the ordered, de-duplicated quality list
    ///
    /// Entries without a quality label are not video encodings and are
    /// dropped. The first occurrence of each label wins. Sorting is stable
    /// and descending by the integer prefix of the label; labels without
    /// one sort last.
    pub fn list_encodings(formats: &[RawFormat]) -> Result<Vec<EncodingDescriptor>, DownloadError> {
        let mut seen = HashSet::new();
        let mut encodings: Vec<EncodingDescriptor> = formats
            .iter()
            .filter_map(|f| {
                let label = f.quality_label.as_deref().filter(|l| !l.is_empty())?;
                Some(EncodingDescriptor {
                    quality_label: label.to_string(),
                    frame_rate: f.fps,
                    has_audio: f.has_audio,
                })
            })
            .filter(|e| seen.insert(e.quality_label.clone()))
            .collect();

        if encodings.is_empty() {
            return Err(DownloadError::SourceLookup(
                "No playable formats found".to_string(),
            ));
        }

        encodings.sort_by(|a, b| {
            match (
                Self::parse_height(&a.quality_label),
                Self::parse_height(&b.quality_label),
            ) {
                (Some(ha), Some(hb)) => hb.cmp(&ha),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        });

        Ok(encodings)
    }

    /// Integer prefix of a quality label ("1080p60" -> 1080)
    pub fn parse_height(label: &str) -> Option<u32> {
        let trimmed = label.trim_start();
        let end = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        trimmed[..end].parse().ok()
    }

    /// Find the best encoding carrying `quality_label`
    ///
    /// Highest video bitrate wins; on a tie an encoding that already has
    /// audio is preferred, then the earlier entry.
    pub fn choose_video<'a>(
        formats: &'a [RawFormat],
        quality_label: &str,
    ) -> Result<&'a RawFormat, DownloadError> {
        let mut best: Option<&RawFormat> = None;

        for f in formats
            .iter()
            .filter(|f| f.has_video && f.quality_label.as_deref() == Some(quality_label))
        {
            let better = match best {
                None => true,
                Some(b) => {
                    let (fb, bb) = (Self::rate(f.video_bitrate), Self::rate(b.video_bitrate));
                    fb > bb || (fb == bb && f.has_audio && !b.has_audio)
                }
            };
            if better {
                best = Some(f);
            }
        }

        best.ok_or_else(|| DownloadError::EncodingNotFound(quality_label.to_string()))
    }

    /// Find the highest-bitrate audio-only encoding
    pub fn choose_audio(formats: &[RawFormat]) -> Result<&RawFormat, DownloadError> {
        let mut best: Option<&RawFormat> = None;

        for f in formats.iter().filter(|f| f.is_audio_only()) {
            if best.map_or(true, |b| Self::rate(f.audio_bitrate) > Self::rate(b.audio_bitrate)) {
                best = Some(f);
            }
        }

        best.ok_or_else(|| DownloadError::EncodingNotFound("audio-only".to_string()))
    }

    // Bitrates compare as integer hundredths of a kbps
    fn rate(bitrate: Option<f32>) -> u64 {
        bitrate.map(|b| (b.max(0.0) * 100.0) as u64).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_video_format(id: &str, label: &str, bitrate: f32, has_audio: bool) -> RawFormat {
        RawFormat {
            format_id: id.to_string(),
            quality_label: Some(label.to_string()),
            fps: Some(30.0),
            has_video: true,
            has_audio,
            video_bitrate: Some(bitrate),
            ext: "mp4".to_string(),
            ..Default::default()
        }
    }

    fn make_audio_format(id: &str, bitrate: f32) -> RawFormat {
        RawFormat {
            format_id: id.to_string(),
            has_audio: true,
            audio_bitrate: Some(bitrate),
            ext: "m4a".to_string(),
            ..Default::default()
        }
    }

    fn labels(encodings: &[EncodingDescriptor]) -> Vec<&str> {
        encodings.iter().map(|e| e.quality_label.as_str()).collect()
    }

    #[test]
    fn test_catalog_dedup_and_sort() {
        let formats = vec![
            make_video_format("18", "360p", 500.0, true),
            make_video_format("137", "1080p", 4000.0, false),
            make_audio_format("140", 128.0),
            make_video_format("22", "720p", 2000.0, true),
            make_video_format("248", "1080p", 3500.0, false),
            make_video_format("136", "720p", 2100.0, false),
        ];

        let encodings = FormatSelector::list_encodings(&formats).unwrap();

        assert_eq!(labels(&encodings), vec!["1080p", "720p", "360p"]);
        // first occurrence per label is kept
        assert!(encodings[1].has_audio);
    }

    #[test]
    fn test_catalog_unparseable_labels_sort_last_stably() {
        let formats = vec![
            make_video_format("a", "hd", 1.0, false),
            make_video_format("b", "480p", 1.0, false),
            make_video_format("c", "sd", 1.0, false),
            make_video_format("d", "1440p60", 1.0, false),
            make_video_format("e", "1440p", 1.0, false),
        ];

        let encodings = FormatSelector::list_encodings(&formats).unwrap();

        assert_eq!(labels(&encodings), vec!["1440p60", "1440p", "480p", "hd", "sd"]);
    }

    #[test]
    fn test_catalog_non_increasing_and_unique() {
        let formats: Vec<RawFormat> = [144, 2160, 720, 720, 1080, 240, 2160]
            .iter()
            .enumerate()
            .map(|(i, h)| make_video_format(&i.to_string(), &format!("{}p", h), 1.0, i % 2 == 0))
            .collect();

        let encodings = FormatSelector::list_encodings(&formats).unwrap();

        let heights: Vec<u32> = encodings
            .iter()
            .map(|e| FormatSelector::parse_height(&e.quality_label).unwrap())
            .collect();
        assert!(heights.windows(2).all(|w| w[0] >= w[1]));
        let unique: HashSet<&str> = labels(&encodings).into_iter().collect();
        assert_eq!(unique.len(), encodings.len());
    }

    #[test]
    fn test_catalog_without_video_fails() {
        let formats = vec![make_audio_format("140", 128.0)];
        let err = FormatSelector::list_encodings(&formats).unwrap_err();
        assert!(matches!(err, DownloadError::SourceLookup(_)));
    }

    #[test]
    fn test_parse_height() {
        assert_eq!(FormatSelector::parse_height("1080p"), Some(1080));
        assert_eq!(FormatSelector::parse_height("720p60 HDR"), Some(720));
        assert_eq!(FormatSelector::parse_height("audio"), None);
        assert_eq!(FormatSelector::parse_height(""), None);
    }

    #[test]
    fn test_choose_video_highest_bitrate() {
        let formats = vec![
            make_video_format("136", "720p", 2100.0, false),
            make_video_format("22", "720p", 2000.0, true),
            make_video_format("137", "1080p", 4000.0, false),
        ];

        let chosen = FormatSelector::choose_video(&formats, "720p").unwrap();
        assert_eq!(chosen.format_id, "136");
    }

    #[test]
    fn test_choose_video_tie_prefers_audio() {
        let formats = vec![
            make_video_format("136", "720p", 2000.0, false),
            make_video_format("22", "720p", 2000.0, true),
        ];

        let chosen = FormatSelector::choose_video(&formats, "720p").unwrap();
        assert_eq!(chosen.format_id, "22");
    }

    #[test]
    fn test_choose_video_missing_label() {
        let formats = vec![make_video_format("22", "720p", 2000.0, true)];
        let err = FormatSelector::choose_video(&formats, "4320p").unwrap_err();
        assert!(matches!(err, DownloadError::EncodingNotFound(ref l) if l == "4320p"));
    }

    #[test]
    fn test_choose_audio() {
        let formats = vec![
            make_video_format("22", "720p", 2000.0, true),
            make_audio_format("139", 48.0),
            make_audio_format("251", 160.0),
            make_audio_format("140", 128.0),
        ];

        let chosen = FormatSelector::choose_audio(&formats).unwrap();
        assert_eq!(chosen.format_id, "251");
    }

    #[test]
    fn test_choose_audio_ignores_combined() {
        let formats = vec![make_video_format("22", "720p", 2000.0, true)];
        assert!(matches!(
            FormatSelector::choose_audio(&formats),
            Err(DownloadError::EncodingNotFound(_))
        ));
    }
}
