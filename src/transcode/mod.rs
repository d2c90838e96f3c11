//! Adaptive image transcoding.
//!
//! Delivery targets enforce a hard byte budget per image. [`ImageArtifact`]
//! pairs encoded bytes with the format they are actually in, and
//! [`ImageArtifact::fit`] re-encodes oversized images as JPEG, stepping the
//! quality parameter down until the output fits or the floor is reached.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::TranscodeError;

/// Encoded-image formats the relay understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl ImageKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
            ImageKind::WebP => "webp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Gif => "image/gif",
            ImageKind::WebP => "image/webp",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            "gif" => Some(ImageKind::Gif),
            "webp" => Some(ImageKind::WebP),
            _ => None,
        }
    }

    fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            ImageFormat::Png => Some(ImageKind::Png),
            ImageFormat::Gif => Some(ImageKind::Gif),
            ImageFormat::WebP => Some(ImageKind::WebP),
            _ => None,
        }
    }
}

/// A decoded image together with its current encoded byte form.
///
/// Invariant: `format` always names the encoding `bytes` is actually in.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    image: DynamicImage,
    bytes: Vec<u8>,
    format: ImageKind,
}

impl ImageArtifact {
    /// Decode encoded bytes into an artifact.
    ///
    /// Unrecognized or corrupt input is a [`TranscodeError::Decode`], which is
    /// distinct from a later budget failure.
    pub fn decode(bytes: Vec<u8>) -> Result<Self, TranscodeError> {
        let guessed = image::guess_format(&bytes)
            .map_err(|e| TranscodeError::decode(e.to_string()))?;
        let format = ImageKind::from_image_format(guessed)
            .ok_or_else(|| TranscodeError::decode(format!("unsupported format {guessed:?}")))?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| TranscodeError::decode(e.to_string()))?;

        Ok(Self {
            image,
            bytes,
            format,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn format(&self) -> ImageKind {
        self.format
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Fit the artifact into `budget` bytes.
    ///
    /// Already-small input is returned unchanged (the format tag still
    /// matches the bytes, since both came from `decode`). Anything larger is
    /// re-encoded as JPEG at quality 100, 95, ... 5; the first result under
    /// budget wins and the artifact becomes a JPEG. If even the lowest
    /// quality does not fit, this is an explicit failure, never an
    /// over-budget buffer.
    pub fn fit(self, budget: usize) -> Result<Self, TranscodeError> {
        if self.bytes.len() <= budget {
            return Ok(self);
        }

        let source_len = self.bytes.len();
        let rgb = self.image.to_rgb8();

        for quality in (5..=100u8).rev().step_by(5) {
            let mut buf = Vec::new();
            JpegEncoder::new_with_quality(&mut buf, quality)
                .encode_image(&rgb)
                .map_err(|e| TranscodeError::encode(e.to_string()))?;

            if buf.len() <= budget {
                debug!(
                    quality,
                    from = source_len,
                    to = buf.len(),
                    "re-encoded image under budget"
                );
                return Ok(Self {
                    image: self.image,
                    bytes: buf,
                    format: ImageKind::Jpeg,
                });
            }
        }

        Err(TranscodeError::BudgetUnsatisfiable {
            size: source_len,
            budget,
        })
    }
}
