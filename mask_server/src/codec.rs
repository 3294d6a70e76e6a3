//! Conversion between transport frames and RGB image buffers.
//!
//! The pipeline always works on `RgbImage`. Incoming frames are unpacked into RGB order and the
//! annotated image is packed back into whatever layout the client asked for. Apart from the
//! channel shuffle (and dropping/adding an opaque alpha channel) pixel values pass through
//! unchanged.
use common::protocol::{PixelFormat, VideoFrame};
use image::{Rgb, RgbImage};

use crate::error::FormatError;

/// Byte offsets of red, green and blue inside one pixel.
fn rgb_offsets(format: PixelFormat) -> Result<[usize; 3], FormatError> {
    match format {
        PixelFormat::Rgb24 | PixelFormat::Rgba => Ok([0, 1, 2]),
        PixelFormat::Bgr24 | PixelFormat::Bgra => Ok([2, 1, 0]),
        other => Err(FormatError::Unsupported(other)),
    }
}

/// Check dimensions and buffer length, returning the pixel stride.
fn validate(frame: &VideoFrame) -> Result<usize, FormatError> {
    let stride = frame
        .format
        .bytes_per_pixel()
        .ok_or(FormatError::Unsupported(frame.format))?;

    if frame.width == 0 || frame.height == 0 {
        return Err(FormatError::Empty {
            width: frame.width,
            height: frame.height,
        });
    }

    let expected = frame.width as usize * frame.height as usize * stride;
    if frame.data.len() != expected {
        return Err(FormatError::BufferSize {
            expected,
            actual: frame.data.len(),
        });
    }

    Ok(stride)
}

/// Unpack a transport frame into an RGB image.
pub fn decode(frame: &VideoFrame) -> Result<RgbImage, FormatError> {
    let offsets = rgb_offsets(frame.format)?;
    let stride = validate(frame)?;

    if frame.format == PixelFormat::Rgb24 {
        return RgbImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or(
            FormatError::BufferSize {
                expected: frame.width as usize * frame.height as usize * 3,
                actual: frame.data.len(),
            },
        );
    }

    let mut rgb = Vec::with_capacity(frame.width as usize * frame.height as usize * 3);
    for pixel in frame.data.chunks_exact(stride) {
        rgb.extend(offsets.iter().map(|&offset| pixel[offset]));
    }

    RgbImage::from_raw(frame.width, frame.height, rgb).ok_or(FormatError::Empty {
        width: frame.width,
        height: frame.height,
    })
}

/// Pack an RGB image into a transport frame with the given layout.
pub fn encode(image: RgbImage, format: PixelFormat, seq: u64) -> Result<VideoFrame, FormatError> {
    let offsets = rgb_offsets(format)?;
    let stride = format
        .bytes_per_pixel()
        .ok_or(FormatError::Unsupported(format))?;
    let (width, height) = image.dimensions();

    if width == 0 || height == 0 {
        return Err(FormatError::Empty { width, height });
    }

    let data = match format {
        PixelFormat::Rgb24 => image.into_raw(),
        _ => {
            let mut data = vec![u8::MAX; width as usize * height as usize * stride];
            for (dst, Rgb(src)) in data.chunks_exact_mut(stride).zip(image.pixels()) {
                for (channel, &offset) in offsets.iter().enumerate() {
                    dst[offset] = src[channel];
                }
            }
            data
        }
    };

    Ok(VideoFrame::new(seq, width, height, format, data))
}
