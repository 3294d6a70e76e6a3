//! Detector stand-ins for unit tests.
use image::RgbImage;

use crate::{
    error::ModelError,
    nn::{Detector, RawDetections},
};

/// Returns the same detections for every image.
pub struct FixedDetector {
    output: RawDetections,
}

impl FixedDetector {
    pub fn new(output: RawDetections) -> Self {
        Self { output }
    }
}

impl Detector for FixedDetector {
    fn detect(&self, _image: &RgbImage) -> Result<RawDetections, ModelError> {
        Ok(self.output.clone())
    }
}

/// Fails every inference.
pub struct FailingDetector;

impl Detector for FailingDetector {
    fn detect(&self, _image: &RgbImage) -> Result<RawDetections, ModelError> {
        Err(ModelError::Malformed("input tensor has the wrong shape".into()))
    }
}
