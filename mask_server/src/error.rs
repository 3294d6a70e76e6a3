//! Error types of the detection pipeline.
//!
use std::path::PathBuf;

use common::protocol::PixelFormat;
use thiserror::Error;

/// Failure at the frame codec boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("unsupported pixel format {0:?}")]
    Unsupported(PixelFormat),
    #[error("frame buffer has {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("frame has zero size ({width}x{height})")]
    Empty { width: u32, height: u32 },
}

/// Failure while loading or running the detection model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file {0} not found")]
    MissingModel(PathBuf),
    #[error("model has no output named {0}")]
    MissingOutput(String),
    #[error("failed to load model: {0}")]
    Load(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("inference failed: {0}")]
    Inference(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("malformed model output: {0}")]
    Malformed(String),
}

/// Inconsistent category configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no category for class id {0}")]
    UnknownClass(i64),
    #[error("failed to read categories file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse categories file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate category id {0}")]
    DuplicateId(i64),
}

/// Parameter value outside the range of its UI control.
#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    #[error("confidence threshold {0} outside [0, 1]")]
    Threshold(f32),
    #[error("max boxes {0} outside [{min}, {max}]", min = crate::processor::MIN_BOXES, max = crate::processor::MAX_BOXES)]
    MaxBoxes(u32),
}

/// Any failure while processing a single frame.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
