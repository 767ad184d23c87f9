//! Frame type and image operations — YUYV conversion, dark detection,
//! face cropping, JPEG encoding.

use std::io::Cursor;

/// A captured grayscale camera frame. Immutable once captured; the capture
/// loop hands complete frames to the decision loop, never partial buffers.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Crop to a bounding box given in corner form, clamping it to the
    /// frame bounds first. An empty intersection is a per-detection error,
    /// not a reason to stop the tick.
    pub fn crop(&self, x_min: i32, y_min: i32, x_max: i32, y_max: i32) -> Result<Frame, FrameError> {
        let x0 = x_min.clamp(0, self.width as i32) as u32;
        let y0 = y_min.clamp(0, self.height as i32) as u32;
        let x1 = x_max.clamp(0, self.width as i32) as u32;
        let y1 = y_max.clamp(0, self.height as i32) as u32;

        if x1 <= x0 || y1 <= y0 {
            return Err(FrameError::EmptyCrop {
                x_min,
                y_min,
                x_max,
                y_max,
            });
        }

        let (w, h) = (x1 - x0, y1 - y0);
        let mut data = Vec::with_capacity((w * h) as usize);
        for y in y0..y1 {
            let row = (y * self.width + x0) as usize;
            data.extend_from_slice(&self.data[row..row + w as usize]);
        }

        Ok(Frame {
            data,
            width: w,
            height: h,
            timestamp: self.timestamp,
            sequence: self.sequence,
            is_dark: self.is_dark,
        })
    }

    /// Encode the frame as JPEG for transport to a remote service.
    pub fn to_jpeg(&self) -> Result<Vec<u8>, FrameError> {
        let expected = (self.width * self.height) as usize;
        let img = image::GrayImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            },
        )?;
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)?;
        Ok(buf)
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
/// Grayscale = every even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Check if a frame is dark using the fraction of pixels below 32.
///
/// Returns true if more than `threshold_pct` of pixels fall in the darkest
/// range. An unlit venue produces frames that would only waste recognition
/// calls.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("bounding box ({x_min},{y_min})-({x_max},{y_max}) does not intersect the frame")]
    EmptyCrop {
        x_min: i32,
        y_min: i32,
        x_max: i32,
        y_max: i32,
    },
    #[error("jpeg encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, data: Vec<u8>) -> Frame {
        Frame {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: 0,
            is_dark: false,
        }
    }

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let yuyv = vec![100, 128, 200, 128];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_to_grayscale_4x2() {
        let yuyv: Vec<u8> = (0..16).collect();
        let gray = yuyv_to_grayscale(&yuyv, 4, 2).unwrap();
        assert_eq!(gray, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_grayscale(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_dark_frame_all_black() {
        let gray = vec![0u8; 1000];
        assert!(is_dark_frame(&gray, 0.95));
    }

    #[test]
    fn test_dark_frame_normal() {
        let gray = vec![128u8; 1000];
        assert!(!is_dark_frame(&gray, 0.95));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn test_crop_interior() {
        // 4x4 gradient frame
        let f = frame(4, 4, (0..16).collect());
        let c = f.crop(1, 1, 3, 3).unwrap();
        assert_eq!((c.width, c.height), (2, 2));
        assert_eq!(c.data, vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_crop_clamps_out_of_bounds_box() {
        let f = frame(4, 4, (0..16).collect());
        // box spills past every edge; clamps to the full frame
        let c = f.crop(-10, -10, 100, 100).unwrap();
        assert_eq!((c.width, c.height), (4, 4));
        assert_eq!(c.data, f.data);
    }

    #[test]
    fn test_crop_rejects_empty_intersection() {
        let f = frame(4, 4, (0..16).collect());
        assert!(matches!(
            f.crop(10, 10, 20, 20),
            Err(FrameError::EmptyCrop { .. })
        ));
        // inverted box
        assert!(f.crop(3, 3, 1, 1).is_err());
    }

    #[test]
    fn test_to_jpeg_roundtrips_dimensions() {
        let f = frame(16, 8, vec![128u8; 16 * 8]);
        let jpeg = f.to_jpeg().unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn test_to_jpeg_rejects_mismatched_buffer() {
        let f = frame(16, 8, vec![128u8; 10]);
        assert!(matches!(
            f.to_jpeg(),
            Err(FrameError::InvalidLength { .. })
        ));
    }
}
