//! QRCodeGenerator (C10): encodes a string into a PNG QR code (§4.8).

use image::{Luma, Rgb, RgbImage};
use qrcode::{EcLevel, QrCode};

/// Error-correction level, exposed independent of the `qrcode` crate's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCorrection {
    /// ~7% of codewords can be restored.
    Low,
    /// ~15% of codewords can be restored. Default.
    Medium,
    /// ~25% of codewords can be restored.
    Quartile,
    /// ~30% of codewords can be restored.
    High,
}

impl Default for ErrorCorrection {
    fn default() -> Self {
        Self::Medium
    }
}

impl From<ErrorCorrection> for EcLevel {
    fn from(level: ErrorCorrection) -> Self {
        match level {
            ErrorCorrection::Low => EcLevel::L,
            ErrorCorrection::Medium => EcLevel::M,
            ErrorCorrection::Quartile => EcLevel::Q,
            ErrorCorrection::High => EcLevel::H,
        }
    }
}

/// Options controlling the rendered QR code's appearance.
#[derive(Debug, Clone)]
pub struct QrOptions {
    /// Side length, in pixels, of each QR module.
    pub module_size: u32,
    /// Error-correction level.
    pub error_correction: ErrorCorrection,
    /// Foreground (dark module) color.
    pub foreground: (u8, u8, u8),
    /// Background (light module) color.
    pub background: (u8, u8, u8),
}

impl Default for QrOptions {
    fn default() -> Self {
        Self {
            module_size: 8,
            error_correction: ErrorCorrection::Medium,
            foreground: (0, 0, 0),
            background: (255, 255, 255),
        }
    }
}

/// Encode `data` as a QR code and render it to PNG bytes.
pub fn encode_png(data: &str, options: &QrOptions) -> Result<Vec<u8>, qrcode::types::QrError> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), options.error_correction.into())?;

    let rendered_luma = code
        .render::<Luma<u8>>()
        .module_dimensions(options.module_size, options.module_size)
        .build();

    let mut rgb = RgbImage::new(rendered_luma.width(), rendered_luma.height());
    for (x, y, pixel) in rendered_luma.enumerate_pixels() {
        let is_dark = pixel.0[0] < 128;
        let color = if is_dark { options.foreground } else { options.background };
        rgb.put_pixel(x, y, Rgb([color.0, color.1, color.2]));
    }

    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(rgb)
        .write_to(&mut buf, image::ImageFormat::Png)
        .expect("encoding to an in-memory PNG buffer cannot fail");

    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_a_url_into_a_nonempty_png() {
        let png = encode_png("http://192.168.1.5:8080/", &QrOptions::default()).unwrap();
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
        assert!(png.len() > 100);
    }

    #[test]
    fn custom_colors_and_module_size_are_honored() {
        let options = QrOptions {
            module_size: 4,
            error_correction: ErrorCorrection::High,
            foreground: (10, 20, 30),
            background: (250, 250, 250),
        };
        let png = encode_png("short", &options).unwrap();
        assert!(!png.is_empty());
    }
}
