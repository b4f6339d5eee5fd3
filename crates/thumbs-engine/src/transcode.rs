//! `x-oss-process` image operations: resize, format and quality.
//!
//! The parameter is `image/` followed by `/`-separated operations, e.g.
//! `image/resize,w_800,h_600/format,jpg/quality,q_90`. Unknown operations
//! and unparsable values are ignored, and so are dimensions above
//! [`MAX_DIMENSION`].

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageFormat, ImageReader, Limits};
use thiserror::Error;
use tracing::debug;

pub const PROCESS_PARAM: &str = "x-oss-process";
pub const DEFAULT_QUALITY: u8 = 85;

/// Largest accepted width or height, for both resize targets and decoded
/// inputs.
pub const MAX_DIMENSION: u32 = 4096;

/// Decoder allocation ceiling: a `MAX_DIMENSION` square RGBA image.
const MAX_DECODE_ALLOC: u64 = MAX_DIMENSION as u64 * MAX_DIMENSION as u64 * 4;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("transcoding task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Requested output format. Only PNG and JPEG are produced; the others are
/// served as JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Jpeg,
    Png,
    #[default]
    Webp,
    Avif,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            "avif" => Some(Self::Avif),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransform {
    /// Target width; 0 when not given.
    pub width: u32,
    /// Target height; 0 when not given.
    pub height: u32,
    pub format: OutputFormat,
    pub quality: u8,
}

impl Default for ImageTransform {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            format: OutputFormat::default(),
            quality: DEFAULT_QUALITY,
        }
    }
}

impl ImageTransform {
    /// Reads `x-oss-process` from a raw query string.
    pub fn from_query(query: Option<&str>) -> Self {
        query
            .into_iter()
            .flat_map(|q| url::form_urlencoded::parse(q.as_bytes()))
            .find(|(key, _)| key == PROCESS_PARAM)
            .map(|(_, value)| Self::parse(&value))
            .unwrap_or_default()
    }

    pub fn parse(param: &str) -> Self {
        let mut transform = Self::default();
        let param = param.trim();
        let operations = param.strip_prefix("image/").unwrap_or(param);

        for operation in operations.split('/') {
            let mut parts = operation.split(',').map(str::trim);
            match parts.next() {
                Some("resize") => {
                    for part in parts {
                        if let Some(w) = part.strip_prefix("w_") {
                            transform.width = parse_dimension(w).unwrap_or(transform.width);
                        } else if let Some(h) = part.strip_prefix("h_") {
                            transform.height = parse_dimension(h).unwrap_or(transform.height);
                        }
                    }
                }
                Some("format") => {
                    if let Some(format) = parts.next().and_then(OutputFormat::parse) {
                        transform.format = format;
                    }
                }
                Some("quality") => {
                    if let Some(q) = parts.next()
                        && let Ok(q) = q.strip_prefix("q_").unwrap_or(q).parse::<u8>()
                        && (1..=100).contains(&q)
                    {
                        transform.quality = q;
                    }
                }
                _ => {}
            }
        }

        transform
    }

    /// Both dimensions, when both are positive.
    pub fn resize(&self) -> Option<(u32, u32)> {
        (self.width > 0 && self.height > 0).then_some((self.width, self.height))
    }

    /// True when the upstream body can be passed through untouched.
    pub fn is_identity(&self) -> bool {
        self.resize().is_none()
            && self.quality == DEFAULT_QUALITY
            && self.format == OutputFormat::Webp
    }
}

/// Non-positive or unparsable values count as "not given" (0). Values
/// above [`MAX_DIMENSION`] are rejected and leave the previous value.
fn parse_dimension(value: &str) -> Option<u32> {
    let value = value.parse::<i64>().ok()?.max(0);
    u32::try_from(value).ok().filter(|v| *v <= MAX_DIMENSION)
}

#[derive(Debug, Clone)]
pub struct Transcoded {
    pub bytes: Bytes,
    pub content_type: &'static str,
}

/// Decodes `input`, applies `transform` and re-encodes it.
pub fn transcode(input: &[u8], transform: &ImageTransform) -> Result<Transcoded, TranscodeError> {
    let mut img = decode(input)?;

    if let Some((width, height)) = transform.resize() {
        img = img.resize_exact(width, height, FilterType::Lanczos3);
    }

    let mut out = Vec::new();
    let content_type = match transform.format {
        OutputFormat::Png => {
            img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
                .map_err(TranscodeError::Encode)?;
            "image/png"
        }
        OutputFormat::Jpeg | OutputFormat::Webp | OutputFormat::Avif => {
            encode_jpeg(&img, transform.quality, &mut out)?;
            "image/jpeg"
        }
    };

    debug!(
        width = img.width(),
        height = img.height(),
        content_type,
        size = out.len(),
        "Transcoded thumbnail"
    );

    Ok(Transcoded {
        bytes: Bytes::from(out),
        content_type,
    })
}

fn decode(input: &[u8]) -> Result<DynamicImage, TranscodeError> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DIMENSION);
    limits.max_image_height = Some(MAX_DIMENSION);
    limits.max_alloc = Some(MAX_DECODE_ALLOC);

    let mut reader = ImageReader::new(Cursor::new(input))
        .with_guessed_format()
        .map_err(|e| TranscodeError::Decode(ImageError::IoError(e)))?;
    reader.limits(limits);
    reader.decode().map_err(TranscodeError::Decode)
}

fn encode_jpeg(img: &DynamicImage, quality: u8, out: &mut Vec<u8>) -> Result<(), TranscodeError> {
    let encoder = JpegEncoder::new_with_quality(out, quality);
    img.to_rgb8()
        .write_with_encoder(encoder)
        .map_err(TranscodeError::Encode)
}

/// Runs [`transcode`] on the blocking pool.
pub async fn transcode_blocking(
    input: Bytes,
    transform: ImageTransform,
) -> Result<Transcoded, TranscodeError> {
    tokio::task::spawn_blocking(move || transcode(&input, &transform)).await?
}
