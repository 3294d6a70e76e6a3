//! Per-connection frame processor.
//!
//! Every media session owns one `MaskProcessor`. The transport calls `process` for each received
//! frame, strictly one frame at a time. The UI side holds a handle to the processor's
//! `ProcessorParams` and may update them at any moment; the frame loop reads them once per frame.
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use common::protocol::{ParamsMsg, VideoFrame};

use crate::{
    categories::CategoryIndex,
    codec,
    error::{ParamError, ProcessError},
    nn::Detector,
    pipeline::annotate,
};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_MAX_BOXES: u32 = 1;
pub const MIN_BOXES: u32 = 1;
pub const MAX_BOXES: u32 = 5;

/// Tunable parameters shared between the UI controls and the frame loop.
///
/// Values are plain atomics: one writer, one reader, and reading a value that is one frame old
/// is fine.
#[derive(Debug)]
pub struct ProcessorParams {
    // f32 bit pattern
    confidence_threshold: AtomicU32,
    max_boxes: AtomicU32,
}

impl Default for ProcessorParams {
    fn default() -> Self {
        Self {
            confidence_threshold: AtomicU32::new(DEFAULT_CONFIDENCE_THRESHOLD.to_bits()),
            max_boxes: AtomicU32::new(DEFAULT_MAX_BOXES),
        }
    }
}

impl ProcessorParams {
    pub fn confidence_threshold(&self) -> f32 {
        f32::from_bits(self.confidence_threshold.load(Ordering::Relaxed))
    }

    pub fn max_boxes(&self) -> u32 {
        self.max_boxes.load(Ordering::Relaxed)
    }

    pub fn set_confidence_threshold(&self, value: f32) -> Result<(), ParamError> {
        check_threshold(value)?;
        self.confidence_threshold
            .store(value.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn set_max_boxes(&self, value: u32) -> Result<(), ParamError> {
        check_max_boxes(value)?;
        self.max_boxes.store(value, Ordering::Relaxed);
        Ok(())
    }

    /// Apply a UI update. Nothing is changed unless every present field is valid.
    pub fn apply(&self, msg: &ParamsMsg) -> Result<(), ParamError> {
        if let Some(value) = msg.confidence_threshold {
            check_threshold(value)?;
        }
        if let Some(value) = msg.max_boxes {
            check_max_boxes(value)?;
        }

        if let Some(value) = msg.confidence_threshold {
            self.set_confidence_threshold(value)?;
        }
        if let Some(value) = msg.max_boxes {
            self.set_max_boxes(value)?;
        }

        Ok(())
    }
}

fn check_threshold(value: f32) -> Result<(), ParamError> {
    match value {
        x if (0.0..=1.0).contains(&x) => Ok(()),
        x => Err(ParamError::Threshold(x)),
    }
}

fn check_max_boxes(value: u32) -> Result<(), ParamError> {
    match value {
        x if (MIN_BOXES..=MAX_BOXES).contains(&x) => Ok(()),
        x => Err(ParamError::MaxBoxes(x)),
    }
}

/// Lifecycle of a processor.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProcessorState {
    /// Constructed, no frame seen yet.
    Idle,
    /// At least one frame was handed to `process`.
    Active,
}

/// Annotates the frames of one connection.
pub struct MaskProcessor {
    detector: Arc<dyn Detector>,
    categories: Arc<CategoryIndex>,
    params: Arc<ProcessorParams>,
    state: ProcessorState,
    frames: u64,
}

impl MaskProcessor {
    /// Create an idle processor with default parameters.
    pub fn new(detector: Arc<dyn Detector>, categories: Arc<CategoryIndex>) -> Self {
        Self {
            detector,
            categories,
            params: Arc::new(ProcessorParams::default()),
            state: ProcessorState::Idle,
            frames: 0,
        }
    }

    /// Handle for the UI side to update parameters.
    pub fn params(&self) -> Arc<ProcessorParams> {
        Arc::clone(&self.params)
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    /// Number of frames successfully annotated.
    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    /// Decode, annotate and re-encode one frame in its original pixel format.
    pub fn process(&mut self, frame: VideoFrame) -> Result<VideoFrame, ProcessError> {
        if self.state == ProcessorState::Idle {
            log::debug!("Processor active with first frame {}", frame.seq);
            self.state = ProcessorState::Active;
        }

        let confidence_threshold = self.params.confidence_threshold();
        let max_boxes = self.params.max_boxes() as usize;

        let mut image = codec::decode(&frame)?;
        let drawn = annotate(
            &mut image,
            self.detector.as_ref(),
            &self.categories,
            confidence_threshold,
            max_boxes,
        )?;
        for detection in drawn.iter() {
            log::debug!(
                "Frame {}: {} at ({:.0}, {:.0})-({:.0}, {:.0})",
                frame.seq,
                &detection.label,
                detection.rect.x_min,
                detection.rect.y_min,
                detection.rect.x_max,
                detection.rect.y_max
            );
        }

        let annotated = codec::encode(image, frame.format, frame.seq)?;
        self.frames += 1;

        Ok(annotated)
    }
}
