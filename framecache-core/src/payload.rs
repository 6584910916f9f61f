//! Decoded media payloads: still images and video preview frames.
//!
//! Both are archived with `rkyv` for the disk tier. Archived bytes are copied
//! into an aligned buffer before validation; files read back from disk carry
//! no alignment guarantee.

use image::{DynamicImage, ImageError, imageops::FilterType};
use rkyv::{rancor::Error as RkyvError, util::AlignedVec};

use crate::{
    error::{CacheError, Result},
    key::ContentMode,
    value::{CacheCodec, Sizeable},
};

/// Box a decoded image is scaled into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
    pub mode: ContentMode,
}

impl TargetSize {
    pub const fn new(width: u32, height: u32, mode: ContentMode) -> Self {
        Self {
            width,
            height,
            mode,
        }
    }
}

/// RGBA8 pixels ready for upload.
#[derive(Clone, PartialEq, Eq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixel_bytes", &self.pixels.len())
            .finish()
    }
}

impl DecodedImage {
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Decode an encoded image (PNG, JPEG, ...) and optionally scale it.
    ///
    /// `ContentMode::Fit` keeps the aspect ratio inside the target box,
    /// `ContentMode::Fill` covers the box and crops the overflow.
    pub fn decode(
        encoded: &[u8],
        target: Option<TargetSize>,
    ) -> std::result::Result<Self, ImageError> {
        let image = image::load_from_memory(encoded)?;
        let image = match target {
            Some(target) => scale(image, target),
            None => image,
        };
        let rgba = image.into_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }
}

fn scale(image: DynamicImage, target: TargetSize) -> DynamicImage {
    let (width, height) = (target.width.max(1), target.height.max(1));
    match target.mode {
        ContentMode::Fit => {
            if image.width() <= width && image.height() <= height {
                image
            } else {
                image.thumbnail(width, height)
            }
        }
        ContentMode::Fill => {
            image.resize_to_fill(width, height, FilterType::Triangle)
        }
    }
}

impl Sizeable for DecodedImage {
    fn cache_size(&self) -> usize {
        self.pixels.len() + std::mem::size_of::<Self>()
    }
}

impl CacheCodec for DecodedImage {
    fn encode(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<RkyvError>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|err| CacheError::SerializationFailed(err.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut aligned: AlignedVec = AlignedVec::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        let image = rkyv::from_bytes::<Self, RkyvError>(&aligned)
            .map_err(|err| CacheError::DeserializationFailed(err.to_string()))?;
        let expected = (image.width as usize)
            .saturating_mul(image.height as usize)
            .saturating_mul(4);
        if image.pixels.len() != expected {
            return Err(CacheError::DeserializationFailed(format!(
                "pixel buffer holds {} bytes, {}x{} RGBA needs {}",
                image.pixels.len(),
                image.width,
                image.height,
                expected
            )));
        }
        Ok(image)
    }
}

/// A still frame sampled from a video at `position_ms`.
#[derive(Debug, Clone, PartialEq, Eq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct PreviewFrame {
    pub position_ms: u64,
    pub image: DecodedImage,
}

impl Sizeable for PreviewFrame {
    fn cache_size(&self) -> usize {
        self.image.cache_size() + std::mem::size_of::<u64>()
    }
}

impl CacheCodec for PreviewFrame {
    fn encode(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<RkyvError>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|err| CacheError::SerializationFailed(err.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut aligned: AlignedVec = AlignedVec::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, RkyvError>(&aligned)
            .map_err(|err| CacheError::DeserializationFailed(err.to_string()))
    }
}
