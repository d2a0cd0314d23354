//! Conversion kinds and container sniffing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of leading bytes [`SniffedFormat::sniff`] needs for a confident answer.
pub const SNIFF_LEN: usize = 12;

/// The two conversions the service performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// JPG/PNG in, WebP out.
    Image,
    /// MP4 in, WebM out.
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    /// File extensions accepted for uploads of this kind (lowercase, no dot).
    pub fn input_extensions(&self) -> &'static [&'static str] {
        match self {
            MediaKind::Image => &["jpg", "jpeg", "png"],
            MediaKind::Video => &["mp4"],
        }
    }

    /// Extension used for the scratch input file when nothing better is known.
    pub fn default_input_extension(&self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
        }
    }

    /// Extension of the converted output.
    pub fn output_extension(&self) -> &'static str {
        match self {
            MediaKind::Image => "webp",
            MediaKind::Video => "webm",
        }
    }

    /// MIME type of the converted output.
    pub fn output_content_type(&self) -> &'static str {
        match self {
            MediaKind::Image => "image/webp",
            MediaKind::Video => "video/webm",
        }
    }

    /// Media types a client may declare for an upload of this kind.
    pub fn accepted_content_types(&self) -> &'static [&'static str] {
        match self {
            MediaKind::Image => &["image/jpeg", "image/jpg", "image/png"],
            MediaKind::Video => &["video/mp4"],
        }
    }

    /// Whether a declared `Content-Type` is acceptable for this kind.
    ///
    /// Only `image/*`, `video/*` and `audio/*` declarations are checked.
    /// Generic types (`application/octet-stream`, the form encoding curl
    /// sends with `--data-binary`, ...) say nothing about the payload and
    /// are left to sniffing. Parameters are ignored and the comparison is
    /// case-insensitive.
    pub fn accepts_content_type(&self, content_type: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let is_media = ["image/", "video/", "audio/"]
            .iter()
            .any(|prefix| essence.starts_with(prefix));
        !is_media || self.accepted_content_types().contains(&essence.as_str())
    }

    /// Whether a filename extension is acceptable for this kind.
    pub fn accepts_extension(&self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        self.input_extensions().contains(&ext.as_str())
    }

    /// Whether sniffed content may be handed to the transcoder for this kind.
    ///
    /// Unrecognised content is allowed through: the transcoder is the
    /// authority on whether it can decode it.
    pub fn accepts_format(&self, format: SniffedFormat) -> bool {
        matches!(
            (self, format),
            (MediaKind::Image, SniffedFormat::Jpeg)
                | (MediaKind::Image, SniffedFormat::Png)
                | (MediaKind::Video, SniffedFormat::Mp4)
                | (_, SniffedFormat::Unknown)
        )
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container format recognised from the first bytes of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffedFormat {
    Jpeg,
    Png,
    Gif,
    WebP,
    /// ISO-BMFF with a video brand (mp4, m4v, qt, ...).
    Mp4,
    /// ISO-BMFF with an image brand (heic, avif).
    Heif,
    /// EBML header: WebM or Matroska.
    Matroska,
    Unknown,
}

impl SniffedFormat {
    /// Classify content by its leading bytes.
    pub fn sniff(head: &[u8]) -> Self {
        if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return SniffedFormat::Jpeg;
        }
        if head.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            return SniffedFormat::Png;
        }
        if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
            return SniffedFormat::Gif;
        }
        if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
            return SniffedFormat::WebP;
        }
        if head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
            return SniffedFormat::Matroska;
        }
        if head.len() >= 12 && &head[4..8] == b"ftyp" {
            return match &head[8..12] {
                b"heic" | b"heix" | b"hevc" | b"mif1" | b"msf1" | b"avif" | b"avis" => {
                    SniffedFormat::Heif
                }
                _ => SniffedFormat::Mp4,
            };
        }
        SniffedFormat::Unknown
    }

    /// Preferred scratch-file extension for this format, if it has one.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            SniffedFormat::Jpeg => Some("jpg"),
            SniffedFormat::Png => Some("png"),
            SniffedFormat::Mp4 => Some("mp4"),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SniffedFormat::Jpeg => "JPEG",
            SniffedFormat::Png => "PNG",
            SniffedFormat::Gif => "GIF",
            SniffedFormat::WebP => "WebP",
            SniffedFormat::Mp4 => "MP4",
            SniffedFormat::Heif => "HEIF",
            SniffedFormat::Matroska => "WebM/Matroska",
            SniffedFormat::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEAD: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

    #[test]
    fn sniff_images() {
        assert_eq!(SniffedFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), SniffedFormat::Jpeg);
        assert_eq!(SniffedFormat::sniff(PNG_HEAD), SniffedFormat::Png);
        assert_eq!(SniffedFormat::sniff(b"GIF89a\x01\x00"), SniffedFormat::Gif);
        assert_eq!(SniffedFormat::sniff(b"RIFF\x10\x00\x00\x00WEBPVP8 "), SniffedFormat::WebP);
    }

    #[test]
    fn sniff_iso_bmff_brands() {
        assert_eq!(SniffedFormat::sniff(b"\x00\x00\x00\x20ftypisom"), SniffedFormat::Mp4);
        assert_eq!(SniffedFormat::sniff(b"\x00\x00\x00\x18ftypmp42"), SniffedFormat::Mp4);
        assert_eq!(SniffedFormat::sniff(b"\x00\x00\x00\x1cftypavif"), SniffedFormat::Heif);
        assert_eq!(SniffedFormat::sniff(b"\x00\x00\x00\x18ftypheic"), SniffedFormat::Heif);
    }

    #[test]
    fn sniff_unknown_and_short() {
        assert_eq!(SniffedFormat::sniff(b""), SniffedFormat::Unknown);
        assert_eq!(SniffedFormat::sniff(b"not an image at all"), SniffedFormat::Unknown);
        // Too short to see the ftyp box.
        assert_eq!(SniffedFormat::sniff(b"\x00\x00\x00\x20ft"), SniffedFormat::Unknown);
        assert_eq!(SniffedFormat::sniff(&[0x1A, 0x45, 0xDF, 0xA3]), SniffedFormat::Matroska);
    }

    #[test]
    fn kind_accepts_own_formats_and_unknown() {
        assert!(MediaKind::Image.accepts_format(SniffedFormat::Jpeg));
        assert!(MediaKind::Image.accepts_format(SniffedFormat::Png));
        assert!(MediaKind::Image.accepts_format(SniffedFormat::Unknown));
        assert!(!MediaKind::Image.accepts_format(SniffedFormat::Mp4));
        assert!(!MediaKind::Image.accepts_format(SniffedFormat::Gif));

        assert!(MediaKind::Video.accepts_format(SniffedFormat::Mp4));
        assert!(MediaKind::Video.accepts_format(SniffedFormat::Unknown));
        assert!(!MediaKind::Video.accepts_format(SniffedFormat::Png));
        assert!(!MediaKind::Video.accepts_format(SniffedFormat::Matroska));
    }

    #[test]
    fn content_type_matching() {
        assert!(MediaKind::Image.accepts_content_type("image/png"));
        assert!(MediaKind::Image.accepts_content_type("IMAGE/JPEG; charset=binary"));
        assert!(MediaKind::Image.accepts_content_type("application/octet-stream"));
        assert!(!MediaKind::Image.accepts_content_type("video/mp4"));
        assert!(MediaKind::Video.accepts_content_type("video/mp4"));
        assert!(!MediaKind::Video.accepts_content_type("video/webm"));
        assert!(!MediaKind::Video.accepts_content_type("audio/mpeg"));
    }

    #[test]
    fn generic_content_types_are_left_to_sniffing() {
        for generic in [
            "application/x-www-form-urlencoded",
            "application/octet-stream",
            "text/plain; charset=utf-8",
        ] {
            assert!(MediaKind::Image.accepts_content_type(generic), "{generic}");
            assert!(MediaKind::Video.accepts_content_type(generic), "{generic}");
        }
    }

    #[test]
    fn extensions() {
        assert!(MediaKind::Image.accepts_extension("JPEG"));
        assert!(!MediaKind::Image.accepts_extension("gif"));
        assert!(MediaKind::Video.accepts_extension("mp4"));
        assert_eq!(MediaKind::Image.output_extension(), "webp");
        assert_eq!(MediaKind::Video.output_content_type(), "video/webm");
    }
}
