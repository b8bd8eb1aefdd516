//! Perceptual similarity hashing
//!
//! An image is reduced to a fixed-length feature vector by a [`FeatureModel`],
//! and each feature is quantized to one of 16 letters (`A`-`P`). Two hashes are
//! compared position by position:
//! - [`similarity`]: fraction of matching positions
//! - [`hamming_distance`]: number of mismatching positions

pub mod plugin;

use image::imageops::FilterType;
use image::DynamicImage;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Number of letters in a hash produced by the default model
pub const HASH_LENGTH: usize = 256;

/// Quantization levels per feature
const LEVELS: u8 = 16;

#[derive(Error, Debug)]
pub enum SimilarityError {
    #[error("Hash lengths differ: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("Hash is empty")]
    EmptyHash,

    #[error("Invalid hash character '{0}'")]
    InvalidCharacter(char),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, SimilarityError>;

/// All processors provided by this crate
pub fn descriptors() -> Vec<asset_pipeline_core::ProcessorDescriptor> {
    vec![plugin::similarity_hasher()]
}

/// Maps a decoded image to features in `[0, 1]`
pub trait FeatureModel: Send + Sync {
    fn name(&self) -> &str;

    /// Number of features produced per image
    fn feature_count(&self) -> usize;

    fn features(&self, image: &DynamicImage) -> Vec<f32>;
}

/// Luminance of a `size`×`size` downscale, contrast-stretched to `[0, 1]`
#[derive(Debug, Clone)]
pub struct LuminanceGridModel {
    size: u32,
}

impl LuminanceGridModel {
    pub fn new(size: u32) -> Self {
        Self { size: size.max(1) }
    }
}

impl Default for LuminanceGridModel {
    fn default() -> Self {
        Self::new(16)
    }
}

impl FeatureModel for LuminanceGridModel {
    fn name(&self) -> &str {
        "luminance-grid"
    }

    fn feature_count(&self) -> usize {
        (self.size * self.size) as usize
    }

    fn features(&self, image: &DynamicImage) -> Vec<f32> {
        let grid = image
            .resize_exact(self.size, self.size, FilterType::Triangle)
            .to_luma8();
        let (min, max) = grid
            .pixels()
            .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));

        // flat images carry no structure
        if max == min {
            return vec![0.0; self.feature_count()];
        }
        let range = f32::from(max - min);
        grid.pixels()
            .map(|p| f32::from(p[0] - min) / range)
            .collect()
    }
}

/// Builds letter hashes from a feature model
pub struct SimilarityHasher {
    model: Box<dyn FeatureModel>,
}

impl SimilarityHasher {
    pub fn new(model: Box<dyn FeatureModel>) -> Self {
        Self { model }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn hash_image(&self, image: &DynamicImage) -> String {
        self.model
            .features(image)
            .into_iter()
            .map(quantize)
            .collect()
    }

    pub fn hash_file(&self, path: &Path) -> Result<String> {
        debug!("Computing similarity hash for {}", path.display());
        let image = image::open(path)?;
        Ok(self.hash_image(&image))
    }
}

impl Default for SimilarityHasher {
    fn default() -> Self {
        Self::new(Box::new(LuminanceGridModel::default()))
    }
}

impl std::fmt::Debug for SimilarityHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityHasher")
            .field("model", &self.model.name())
            .finish()
    }
}

/// Map a feature in `[0, 1]` to `A`..=`P`
fn quantize(value: f32) -> char {
    let level = (value.clamp(0.0, 1.0) * f32::from(LEVELS)) as u8;
    char::from(b'A' + level.min(LEVELS - 1))
}

fn check_pair(a: &str, b: &str) -> Result<usize> {
    if let Some(bad) = a.chars().chain(b.chars()).find(|c| !('A'..='P').contains(c)) {
        return Err(SimilarityError::InvalidCharacter(bad));
    }
    if a.len() != b.len() {
        return Err(SimilarityError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    if a.is_empty() {
        return Err(SimilarityError::EmptyHash);
    }
    Ok(a.len())
}

/// Number of positions at which two hashes differ
pub fn hamming_distance(a: &str, b: &str) -> Result<usize> {
    check_pair(a, b)?;
    Ok(a.bytes().zip(b.bytes()).filter(|(x, y)| x != y).count())
}

/// Fraction of positions at which two hashes agree, in `[0, 1]`
pub fn similarity(a: &str, b: &str) -> Result<f64> {
    let len = check_pair(a, b)?;
    let distance = hamming_distance(a, b)?;
    Ok((len - distance) as f64 / len as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, _| {
            let v = (x * 255 / (width - 1)) as u8;
            Rgb([v, v, v])
        }))
    }

    #[test]
    fn test_quantize_bounds() {
        assert_eq!(quantize(0.0), 'A');
        assert_eq!(quantize(1.0), 'P');
        assert_eq!(quantize(0.5), 'I');
        assert_eq!(quantize(-3.0), 'A');
        assert_eq!(quantize(7.0), 'P');
    }

    #[test]
    fn test_hash_shape() {
        let hash = SimilarityHasher::default().hash_image(&gradient(320, 240));
        assert_eq!(hash.len(), HASH_LENGTH);
        assert!(hash.chars().all(|c| ('A'..='P').contains(&c)));
        assert!(hash.starts_with('A'));
        assert!(hash[..16].ends_with('P'));
    }

    #[test]
    fn test_hash_is_deterministic_and_scale_tolerant() {
        let hasher = SimilarityHasher::default();
        let large = hasher.hash_image(&gradient(640, 480));
        assert_eq!(large, hasher.hash_image(&gradient(640, 480)));

        let small = hasher.hash_image(&gradient(320, 240));
        assert!(similarity(&large, &small).unwrap() > 0.8);
    }

    #[test]
    fn test_contrast_stretch() {
        let dim = DynamicImage::ImageLuma8(GrayImage::from_fn(32, 32, |x, _| {
            Luma([if x < 16 { 100 } else { 110 }])
        }));
        let hash = SimilarityHasher::default().hash_image(&dim);
        assert_eq!(&hash[..2], "AA");
        assert_eq!(&hash[14..16], "PP");

        let flat = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([77])));
        assert_eq!(SimilarityHasher::default().hash_image(&flat), "A".repeat(HASH_LENGTH));
    }

    #[test]
    fn test_similarity_and_distance() {
        assert_eq!(hamming_distance("AAAA", "AAAA").unwrap(), 0);
        assert_eq!(hamming_distance("AAAA", "ABAP").unwrap(), 2);
        assert_eq!(similarity("AAAA", "ABAP").unwrap(), 0.5);
        assert_eq!(similarity("PPPP", "PPPP").unwrap(), 1.0);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            similarity("AAA", "AAAA"),
            Err(SimilarityError::LengthMismatch { left: 3, right: 4 })
        ));
        assert!(matches!(
            hamming_distance("AAZ", "AAA"),
            Err(SimilarityError::InvalidCharacter('Z'))
        ));
        assert!(matches!(similarity("", ""), Err(SimilarityError::EmptyHash)));
    }
}
