//! Image inspection and proxy generation using the `image` crate

use asset_analysis_common::{ProcessingError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Extended image properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageProperties {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub color_type: String,
    pub bits_per_pixel: u16,
    pub has_alpha: bool,
    pub file_size: u64,
}

/// Width and height without decoding pixel data
pub fn dimensions(path: &Path) -> Result<(u32, u32)> {
    Ok(image::image_dimensions(path)?)
}

/// Decode the image and report its format and pixel layout
pub fn read_properties(path: &Path) -> Result<ImageProperties> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let format = reader
        .format()
        .and_then(|format| format.extensions_str().first().copied())
        .ok_or_else(|| ProcessingError::UnsupportedFormat(path.display().to_string()))?
        .to_string();
    let image = reader.decode()?;
    let color = image.color();
    let (width, height) = image.dimensions();

    Ok(ImageProperties {
        width,
        height,
        format,
        color_type: format!("{color:?}"),
        bits_per_pixel: color.bits_per_pixel(),
        has_alpha: color.has_alpha(),
        file_size: std::fs::metadata(path)?.len(),
    })
}

/// Size of a proxy whose long edge is at most `max_size`, never upscaled
pub fn proxy_dimensions(width: u32, height: u32, max_size: u32) -> (u32, u32) {
    let long_edge = width.max(height);
    if long_edge <= max_size {
        return (width, height);
    }
    let scale = f64::from(max_size) / f64::from(long_edge);
    let scaled = |edge: u32| ((f64::from(edge) * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

/// Write a JPEG proxy of `source` to `output`, returning its dimensions
pub fn write_jpeg_proxy(source: &Path, output: &Path, max_size: u32, quality: u8) -> Result<(u32, u32)> {
    let image = image::open(source)?;
    let (width, height) = proxy_dimensions(image.width(), image.height(), max_size);
    let resized = if (width, height) == image.dimensions() {
        image
    } else {
        image.resize_exact(width, height, FilterType::Lanczos3)
    };

    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut writer = BufWriter::new(File::create(output)?);
    JpegEncoder::new_with_quality(&mut writer, quality).encode_image(&rgb)?;
    writer.flush()?;
    Ok((width, height))
}
