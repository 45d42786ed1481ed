//! Frame type and pixel conversion: YUYV, MJPEG, GREY and Y16 to RGBA, dark detection.

use image::RgbaImage;

/// A captured camera frame in RGBA.
#[derive(Clone)]
pub struct Frame {
    /// RGBA pixel data (width * height * 4 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let pixels = self.data.len() / 4;
        if pixels == 0 {
            return 0.0;
        }
        self.data.chunks_exact(4).map(|p| luma(p[0], p[1], p[2])).sum::<f32>() / pixels as f32
    }

    /// View the frame as an [`RgbaImage`]. `None` if the buffer does not match the dimensions.
    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
    }

    pub fn into_image(self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.data)
    }
}

fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Convert packed YUYV (4:2:2) to RGBA using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgba(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            format: "YUYV",
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgba.extend_from_slice(&[
                clamp_u8(y + 1.402 * v),
                clamp_u8(y - 0.344_136 * u - 0.714_136 * v),
                clamp_u8(y + 1.772 * u),
                255,
            ]);
        }
    }
    Ok(rgba)
}

/// Expand 8-bit grayscale to RGBA.
pub fn grey_to_rgba(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    if grey.len() < pixels {
        return Err(FrameError::InvalidLength {
            format: "GREY",
            expected: pixels,
            actual: grey.len(),
        });
    }
    Ok(grey[..pixels].iter().flat_map(|&g| [g, g, g, 255]).collect())
}

/// Downscale 16-bit little-endian grayscale to 8 bits and expand to RGBA.
pub fn y16_to_rgba(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength {
            format: "Y16",
            expected,
            actual: y16.len(),
        });
    }
    Ok(y16[..expected]
        .chunks_exact(2)
        .flat_map(|px| {
            let g = (u16::from_le_bytes([px[0], px[1]]) >> 8) as u8;
            [g, g, g, 255]
        })
        .collect())
}

/// Decode one MJPEG frame. The decoded size must match the negotiated size.
pub fn mjpeg_to_rgba(jpeg: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let decoded = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?
        .to_rgba8();
    if decoded.dimensions() != (width, height) {
        return Err(FrameError::DimensionMismatch {
            expected: (width, height),
            actual: decoded.dimensions(),
        });
    }
    Ok(decoded.into_raw())
}

/// Check if an RGBA frame is dark.
///
/// Returns true if more than `threshold_pct` of pixels have luma below 32.
pub fn is_dark_frame(rgba: &[u8], threshold_pct: f32) -> bool {
    let pixels = rgba.len() / 4;
    if pixels == 0 {
        return true;
    }
    let dark_count = rgba
        .chunks_exact(4)
        .filter(|p| luma(p[0], p[1], p[2]) < 32.0)
        .count();
    (dark_count as f32 / pixels as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("MJPEG decode failed: {0}")]
    Decode(String),
    #[error("decoded frame is {actual:?}, expected {expected:?}")]
    DimensionMismatch { expected: (u32, u32), actual: (u32, u32) },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_neutral_chroma_is_grey() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let rgba = yuyv_to_rgba(&[100, 128, 200, 128], 2, 1).unwrap();
        assert_eq!(rgba, vec![100, 100, 100, 255, 200, 200, 200, 255]);
    }

    #[test]
    fn test_yuyv_red_chroma() {
        let rgba = yuyv_to_rgba(&[80, 128, 80, 240], 2, 1).unwrap();
        assert!(rgba[0] > 200, "red channel {}", rgba[0]);
        assert!(rgba[1] < 30);
        assert_eq!(rgba[3], 255);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let err = yuyv_to_rgba(&[0; 4], 4, 2).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength { expected: 16, actual: 4, .. }));
    }

    #[test]
    fn test_grey_to_rgba() {
        assert_eq!(grey_to_rgba(&[7, 9], 2, 1).unwrap(), vec![7, 7, 7, 255, 9, 9, 9, 255]);
        assert!(grey_to_rgba(&[7], 2, 1).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        // 0xAB12 little-endian -> 0xAB
        assert_eq!(y16_to_rgba(&[0x12, 0xAB], 1, 1).unwrap(), vec![0xAB, 0xAB, 0xAB, 255]);
    }

    #[test]
    fn test_mjpeg_decode_roundtrip_size() {
        let img = RgbaImage::from_pixel(8, 6, image::Rgba([90, 120, 150, 255]));
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .to_rgb8()
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();

        let rgba = mjpeg_to_rgba(&jpeg, 8, 6).unwrap();
        assert_eq!(rgba.len(), 8 * 6 * 4);
        assert!(matches!(
            mjpeg_to_rgba(&jpeg, 16, 6),
            Err(FrameError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_mjpeg_garbage_rejected() {
        assert!(matches!(mjpeg_to_rgba(&[1, 2, 3], 1, 1), Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_dark_frame_all_black() {
        assert!(is_dark_frame(&[0, 0, 0, 255].repeat(100), 0.95));
    }

    #[test]
    fn test_dark_frame_normal() {
        assert!(!is_dark_frame(&[128, 128, 128, 255].repeat(100), 0.95));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn test_dark_frame_mostly_dark() {
        let mut px = [10, 10, 10, 255].repeat(97);
        px.extend([200, 200, 200, 255].repeat(3));
        assert!(is_dark_frame(&px, 0.95));
    }

    #[test]
    fn test_frame_to_image_and_brightness() {
        let frame = Frame {
            data: [50, 50, 50, 255].repeat(6),
            width: 3,
            height: 2,
            timestamp: std::time::Instant::now(),
            sequence: 0,
            is_dark: false,
        };
        assert!((frame.avg_brightness() - 50.0).abs() < 0.01);
        assert_eq!(frame.to_image().unwrap().dimensions(), (3, 2));

        let bad = Frame { width: 4, ..frame };
        assert!(bad.into_image().is_none());
    }
}
