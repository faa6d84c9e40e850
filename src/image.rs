// src/image.rs
//! Image URL validation: a candidate is usable only if it downloads with
//! status 200 within the timeout and its bytes decode as a raster image.
//!
//! Decoding stops at the header: format signature plus non-zero dimensions.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;

use crate::error::FetchError;
use crate::http::{parse_http_url, Transport};

#[derive(Debug, Clone)]
pub struct ImageSettings {
    pub timeout: Duration,
    pub max_bytes: usize,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_bytes: 8 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Bmp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub url: String,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
}

/// Why a candidate was not accepted. Never fatal to the caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ImageRejection {
    #[error("no image url")]
    Missing,
    #[error("invalid image url: {0}")]
    InvalidUrl(String),
    #[error("download failed: {0}")]
    Fetch(FetchError),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("image larger than {limit} bytes")]
    TooLarge { limit: usize },
    #[error("not a raster image ({0})")]
    Unsupported(String),
    #[error("image bytes do not decode")]
    Undecodable,
}

impl ImageRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            ImageRejection::Missing => "missing",
            ImageRejection::InvalidUrl(_) => "invalid_url",
            ImageRejection::Fetch(e) if matches!(e, FetchError::Timeout { .. }) => "timeout",
            ImageRejection::Fetch(_) => "fetch",
            ImageRejection::Status(_) => "status",
            ImageRejection::TooLarge { .. } => "too_large",
            ImageRejection::Unsupported(_) => "unsupported",
            ImageRejection::Undecodable => "undecodable",
        }
    }
}

#[derive(Clone)]
pub struct ImageValidator {
    transport: Arc<dyn Transport>,
    settings: ImageSettings,
}

impl ImageValidator {
    pub fn new(transport: Arc<dyn Transport>, settings: ImageSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// `true` iff `url` is present, downloads and decodes. Any error counts as invalid.
    pub async fn validate(&self, url: Option<&str>) -> bool {
        match url {
            Some(u) => self.inspect(u).await.is_ok(),
            None => false,
        }
    }

    /// Download and decode `url`, reporting why it was rejected.
    pub async fn inspect(&self, url: &str) -> Result<ImageInfo, ImageRejection> {
        let res = self.inspect_inner(url.trim()).await;
        if let Err(rej) = &res {
            counter!("image_rejected_total", "reason" => rej.reason()).increment(1);
            tracing::debug!(target: "image", url, reason = rej.reason(), error = %rej, "image rejected");
        }
        res
    }

    async fn inspect_inner(&self, url: &str) -> Result<ImageInfo, ImageRejection> {
        if url.is_empty() {
            return Err(ImageRejection::Missing);
        }
        parse_http_url(url).map_err(|e| ImageRejection::InvalidUrl(e.to_string()))?;

        let resp = self
            .transport
            .get_limited(url, self.settings.timeout, self.settings.max_bytes)
            .await
            .map_err(|e| match e {
                FetchError::TooLarge { limit, .. } => ImageRejection::TooLarge { limit },
                other => ImageRejection::Fetch(other),
            })?;

        if resp.status != 200 {
            return Err(ImageRejection::Status(resp.status));
        }

        // A declared type must be a raster image; a missing one leaves it to the bytes.
        if let Some(media) = resp.media_type().filter(|m| !m.is_empty()) {
            if !media.starts_with("image/") || media == "image/svg+xml" {
                return Err(ImageRejection::Unsupported(media));
            }
        }

        match sniff(&resp.body) {
            Some((format, width, height)) if width > 0 && height > 0 => Ok(ImageInfo {
                url: url.to_string(),
                format,
                width,
                height,
                bytes: resp.body.len(),
            }),
            Some(_) => Err(ImageRejection::Undecodable),
            None if looks_like_markup(&resp.body) => {
                Err(ImageRejection::Unsupported("markup".to_string()))
            }
            None => Err(ImageRejection::Undecodable),
        }
    }
}

fn looks_like_markup(body: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&body[..body.len().min(256)]).to_ascii_lowercase();
    let head = head.trim_start();
    head.starts_with('<')
}

/// Detect the format and read dimensions from the header bytes.
pub fn sniff(b: &[u8]) -> Option<(ImageFormat, u32, u32)> {
    if b.starts_with(b"\x89PNG\r\n\x1a\n") {
        if b.len() < 24 || &b[12..16] != b"IHDR" {
            return None;
        }
        let w = u32::from_be_bytes([b[16], b[17], b[18], b[19]]);
        let h = u32::from_be_bytes([b[20], b[21], b[22], b[23]]);
        return Some((ImageFormat::Png, w, h));
    }
    if b.starts_with(b"GIF87a") || b.starts_with(b"GIF89a") {
        if b.len() < 10 {
            return None;
        }
        let w = u16::from_le_bytes([b[6], b[7]]) as u32;
        let h = u16::from_le_bytes([b[8], b[9]]) as u32;
        return Some((ImageFormat::Gif, w, h));
    }
    if b.starts_with(&[0xFF, 0xD8]) {
        return jpeg_size(b).map(|(w, h)| (ImageFormat::Jpeg, w, h));
    }
    if b.len() >= 12 && &b[0..4] == b"RIFF" && &b[8..12] == b"WEBP" {
        return webp_size(b).map(|(w, h)| (ImageFormat::Webp, w, h));
    }
    if b.starts_with(b"BM") {
        return bmp_size(b).map(|(w, h)| (ImageFormat::Bmp, w, h));
    }
    None
}

fn jpeg_size(b: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2;
    while i + 3 < b.len() {
        if b[i] != 0xFF {
            return None;
        }
        let marker = b[i + 1];
        match marker {
            // fill byte
            0xFF => {
                i += 1;
                continue;
            }
            // standalone markers
            0x01 | 0xD0..=0xD8 => {
                i += 2;
                continue;
            }
            // end of image / start of scan before any frame header
            0xD9 | 0xDA => return None,
            _ => {}
        }
        let seg_len = u16::from_be_bytes([b[i + 2], b[i + 3]]) as usize;
        if seg_len < 2 {
            return None;
        }
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            // FF Cx | len(2) | precision(1) | height(2) | width(2)
            if i + 9 > b.len() {
                return None;
            }
            let h = u16::from_be_bytes([b[i + 5], b[i + 6]]) as u32;
            let w = u16::from_be_bytes([b[i + 7], b[i + 8]]) as u32;
            return Some((w, h));
        }
        i += 2 + seg_len;
    }
    None
}

fn webp_size(b: &[u8]) -> Option<(u32, u32)> {
    if b.len() < 16 {
        return None;
    }
    match &b[12..16] {
        b"VP8 " => {
            if b.len() < 30 || b[23..26] != [0x9D, 0x01, 0x2A] {
                return None;
            }
            let w = u16::from_le_bytes([b[26], b[27]]) & 0x3FFF;
            let h = u16::from_le_bytes([b[28], b[29]]) & 0x3FFF;
            Some((w as u32, h as u32))
        }
        b"VP8L" => {
            if b.len() < 25 || b[20] != 0x2F {
                return None;
            }
            let (b0, b1, b2, b3) = (b[21] as u32, b[22] as u32, b[23] as u32, b[24] as u32);
            let w = 1 + (((b1 & 0x3F) << 8) | b0);
            let h = 1 + (((b3 & 0x0F) << 10) | (b2 << 2) | ((b1 & 0xC0) >> 6));
            Some((w, h))
        }
        b"VP8X" => {
            if b.len() < 30 {
                return None;
            }
            let w = 1 + u32::from_le_bytes([b[24], b[25], b[26], 0]);
            let h = 1 + u32::from_le_bytes([b[27], b[28], b[29], 0]);
            Some((w, h))
        }
        _ => None,
    }
}

fn bmp_size(b: &[u8]) -> Option<(u32, u32)> {
    if b.len() < 26 {
        return None;
    }
    let dib = u32::from_le_bytes([b[14], b[15], b[16], b[17]]);
    if dib == 12 {
        let w = u16::from_le_bytes([b[18], b[19]]) as u32;
        let h = u16::from_le_bytes([b[20], b[21]]) as u32;
        return Some((w, h));
    }
    let w = i32::from_le_bytes([b[18], b[19], b[20], b[21]]);
    let h = i32::from_le_bytes([b[22], b[23], b[24], b[25]]);
    Some((w.unsigned_abs(), h.unsigned_abs()))
}
