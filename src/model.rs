//! Response shapes returned by the API and the mapping from yt-dlp's raw
//! output into them.

use serde::{Deserialize, Serialize};

use crate::extractor::{RawFormat, RawInfo};

/// Label used when the extractor reports no resolution (audio-only tracks).
pub const AUDIO_ONLY: &str = "audio only";
/// Same-origin path thumbnails are rewritten to.
pub const IMAGE_PROXY_PATH: &str = "/proxy_image";
const FALLBACK_FILE_STEM: &str = "video";
/// Extension used when the extractor reports none, or nothing usable.
const FALLBACK_EXT: &str = "bin";

/// Delivery protocols that need a manifest-aware client and therefore cannot
/// be fetched as a single file.
const SEGMENTED_PROTOCOLS: &[&str] = &[
    "m3u8",
    "m3u8_native",
    "http_dash_segments",
    "http_dash_segments_generator",
    "dash",
    "f4m",
    "ism",
];

/// One downloadable variant of a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub format_id: String,
    pub ext: String,
    pub resolution: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcodec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acodec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub thumbnail: String,
    pub duration: Option<f64>,
    pub original_url: String,
    pub formats: Vec<VideoFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectUrl {
    pub direct_url: String,
}

pub fn is_segmented_protocol(protocol: &str) -> bool {
    protocol
        .split('+')
        .any(|part| SEGMENTED_PROTOCOLS.contains(&part.trim()))
}

impl VideoFormat {
    /// Returns `None` for entries without an identifier or that use a
    /// segmented protocol.
    pub fn from_raw(raw: &RawFormat) -> Option<Self> {
        let format_id = raw.format_id.clone()?;
        if raw.protocol.as_deref().is_some_and(is_segmented_protocol) {
            return None;
        }
        let resolution = raw
            .resolution
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(AUDIO_ONLY)
            .to_string();
        Some(Self {
            format_id,
            ext: raw.ext.clone().unwrap_or_default(),
            resolution,
            filesize: raw.filesize,
            url: raw.url.clone(),
            vcodec: raw.vcodec.clone(),
            acodec: raw.acodec.clone(),
            width: raw.width,
            height: raw.height,
        })
    }
}

impl VideoInfo {
    pub fn from_raw(raw: &RawInfo, original_url: &str) -> Self {
        Self {
            id: raw.id.clone().unwrap_or_default(),
            title: raw.title.clone().unwrap_or_default(),
            thumbnail: raw.thumbnail_url().map(proxied_thumbnail).unwrap_or_default(),
            duration: raw.duration,
            original_url: original_url.to_string(),
            formats: raw.formats().iter().filter_map(VideoFormat::from_raw).collect(),
        }
    }
}

/// Points a thumbnail at the image proxy so the browser never hits the
/// third-party host directly.
pub fn proxied_thumbnail(url: &str) -> String {
    format!("{IMAGE_PROXY_PATH}?url={}", urlencoding::encode(url))
}

/// Builds a `Content-Disposition` filename: ASCII alphanumerics and spaces
/// from the title, trailing whitespace removed, then `.ext`. The extension is
/// reduced to ASCII alphanumerics as well, so the result is always a valid
/// quoted header parameter.
pub fn attachment_filename(title: &str, ext: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect();
    let stem = cleaned.trim_end();
    let stem = if stem.is_empty() {
        FALLBACK_FILE_STEM
    } else {
        stem
    };
    let ext: String = ext.chars().filter(char::is_ascii_alphanumeric).collect();
    let ext = if ext.is_empty() { FALLBACK_EXT } else { ext.as_str() };
    format!("{stem}.{ext}")
}
