//! Render surface the frames and processed images are composited onto.

use std::sync::{Arc, Mutex};

use image::{
    DynamicImage, Rgba, RgbaImage,
    codecs::jpeg::JpegEncoder,
    imageops::{self, FilterType},
};
use video_ingest::Frame;

use crate::client::error::ClientError;

/// JPEG quality used for submitted frames (0.8 on a 0 to 1 scale).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// RGBA canvas sized to the active capture resolution.
#[derive(Clone, Debug)]
pub struct Surface {
    image: RgbaImage,
}

pub type SharedSurface = Arc<Mutex<Surface>>;

impl Default for Surface {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, TRANSPARENT),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        let (width, height) = self.dimensions();
        width == 0 || height == 0
    }

    /// Resize the canvas. Like a canvas element, resizing also clears it.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.image = RgbaImage::from_pixel(width, height, TRANSPARENT);
    }

    pub fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = TRANSPARENT;
        }
    }

    /// Draw `source` stretched over the whole canvas, horizontally flipped when
    /// `mirror` is set.
    pub fn draw(&mut self, source: &RgbaImage, mirror: bool) {
        if self.is_empty() || source.width() == 0 || source.height() == 0 {
            return;
        }
        let (width, height) = self.dimensions();
        let mut scaled = if source.dimensions() == (width, height) {
            source.clone()
        } else {
            imageops::resize(source, width, height, FilterType::Triangle)
        };
        if mirror {
            imageops::flip_horizontal_in_place(&mut scaled);
        }
        imageops::overlay(&mut self.image, &scaled, 0, 0);
    }

    /// Draw a captured frame. Frames whose buffer does not match their
    /// declared size are ignored; returns whether anything was drawn.
    pub fn draw_frame(&mut self, frame: &Frame, mirror: bool) -> bool {
        match frame_to_image(frame) {
            Some(image) => {
                self.draw(&image, mirror);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> RgbaImage {
        self.image.clone()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

pub fn frame_to_image(frame: &Frame) -> Option<RgbaImage> {
    if frame.width <= 0 || frame.height <= 0 {
        return None;
    }
    RgbaImage::from_raw(frame.width as u32, frame.height as u32, frame.to_rgba())
}

/// Encode an RGBA image as baseline JPEG. Alpha is dropped.
pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> Result<Vec<u8>, ClientError> {
    let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(ClientError::Encode)?;
    Ok(buffer)
}
