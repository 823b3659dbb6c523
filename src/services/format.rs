//! Output format handling service
//!
//! Keeps encoding concerns (alpha handling, quality, extensions) out of the
//! compositor and the segmentation backends.

use crate::{
    config::{CompositorConfig, OutputFormat},
    error::{Result, RmbgError},
    types::ImageResource,
};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageBuffer, ImageFormat, RgbaImage};
use std::io::Cursor;

/// Service for converting and encoding raster output
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Convert an RGBA image to the pixel layout expected by `format`
    ///
    /// JPEG cannot carry alpha, so the channel is dropped. Callers encoding a
    /// flattened composite lose nothing; callers encoding a cutout should
    /// stick to a format where [`Self::supports_transparency`] holds.
    #[must_use]
    pub fn convert_format(rgba_image: RgbaImage, format: OutputFormat) -> DynamicImage {
        match format {
            OutputFormat::Png | OutputFormat::Tiff | OutputFormat::WebP => {
                DynamicImage::ImageRgba8(rgba_image)
            },
            OutputFormat::Jpeg => {
                let (width, height) = rgba_image.dimensions();
                let mut rgb_image = ImageBuffer::new(width, height);

                for (x, y, pixel) in rgba_image.enumerate_pixels() {
                    rgb_image.put_pixel(x, y, image::Rgb([pixel[0], pixel[1], pixel[2]]));
                }

                DynamicImage::ImageRgb8(rgb_image)
            },
        }
    }

    /// Encode an RGBA canvas into an [`ImageResource`] using the compositor settings
    ///
    /// # Errors
    /// - Encoder failures (including formats whose codec feature is disabled)
    pub fn encode(rgba_image: RgbaImage, config: &CompositorConfig) -> Result<ImageResource> {
        let format = config.output_format;
        let image = Self::convert_format(rgba_image, format);
        let mut buffer = Cursor::new(Vec::new());

        let encoded = match format {
            OutputFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut buffer, config.jpeg_quality);
                image.write_with_encoder(encoder)
            },
            _ => image.write_to(&mut buffer, format.image_format()),
        };
        encoded
            .map_err(|e| RmbgError::composition(format!("Failed to encode {:?}: {}", format, e)))?;

        Ok(ImageResource::from_bytes(buffer.into_inner()).with_format(format.image_format()))
    }

    /// Encode a cutout losslessly as PNG, keeping the alpha channel intact
    ///
    /// # Errors
    /// - PNG encoder failures
    pub fn encode_png(rgba_image: &RgbaImage) -> Result<ImageResource> {
        let mut buffer = Cursor::new(Vec::new());
        rgba_image
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| RmbgError::segmentation(format!("Failed to encode PNG: {}", e)))?;
        Ok(ImageResource::from_bytes(buffer.into_inner()).with_format(ImageFormat::Png))
    }

    /// File extension for a given output format (without the dot)
    ///
    /// # Examples
    /// ```rust
    /// use rmbg::{services::OutputFormatHandler, OutputFormat};
    ///
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Png), "png");
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Jpeg), "jpg");
    /// ```
    #[must_use]
    pub fn get_extension(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::WebP => "webp",
            OutputFormat::Tiff => "tiff",
        }
    }

    /// Check if a format supports transparency (alpha channel)
    #[must_use]
    pub fn supports_transparency(format: OutputFormat) -> bool {
        match format {
            OutputFormat::Png | OutputFormat::WebP | OutputFormat::Tiff => true,
            OutputFormat::Jpeg => false,
        }
    }
}
