//! State shared by all connections and the per-frame hand-off to the blocking pool.
//!
use std::sync::Arc;

use anyhow::Result;
use common::protocol::VideoFrame;

use crate::{
    categories::CategoryIndex,
    error::ProcessError,
    meter::METER,
    nn::Detector,
    processor::MaskProcessor,
};

/// Process-wide state: the model loaded at startup and the category table.
pub struct AppState {
    pub detector: Arc<dyn Detector>,
    pub categories: Arc<CategoryIndex>,
}

impl AppState {
    pub fn new(detector: Arc<dyn Detector>, categories: CategoryIndex) -> Self {
        Self {
            detector,
            categories: Arc::new(categories),
        }
    }

    /// Fresh processor for a new connection.
    pub fn new_processor(&self) -> MaskProcessor {
        MaskProcessor::new(Arc::clone(&self.detector), Arc::clone(&self.categories))
    }
}

/// Run one frame through the processor on the blocking thread pool.
///
/// The processor is moved into the blocking task and handed back with the result, so frames of
/// one connection are still processed one after another. Errors of the frame itself are returned
/// in the inner result; the outer error means the task panicked.
pub async fn process_frame(
    processor: MaskProcessor,
    frame: VideoFrame,
) -> Result<(MaskProcessor, Result<VideoFrame, ProcessError>)> {
    METER.tick_received();

    let (processor, result) = tokio::task::spawn_blocking(move || {
        let mut processor = processor;
        let result = processor.process(frame);
        (processor, result)
    })
    .await?;

    match &result {
        Ok(_) => METER.tick_annotated(),
        Err(e) => {
            METER.tick_dropped();
            log::warn!("Dropping frame: {e}");
        }
    }

    Ok((processor, result))
}

#[cfg(test)]
mod test {
    use common::protocol::PixelFormat;

    use super::*;
    use crate::{
        processor::ProcessorState,
        testing::{FailingDetector, FixedDetector},
    };

    #[tokio::test]
    async fn test_processor_comes_back() -> Result<()> {
        let state = AppState::new(
            Arc::new(FixedDetector::new(Default::default())),
            CategoryIndex::default(),
        );
        let frame = VideoFrame::new(5, 4, 4, PixelFormat::Rgba, [7, 8, 9, 255].repeat(16));

        let (processor, result) = process_frame(state.new_processor(), frame.clone()).await?;

        assert_eq!(processor.state(), ProcessorState::Active);
        assert_eq!(processor.frames_processed(), 1);
        // Nothing detected, nothing drawn
        assert_eq!(result?, frame);

        Ok(())
    }

    #[tokio::test]
    async fn test_frame_error_is_returned() -> Result<()> {
        let state = AppState::new(Arc::new(FailingDetector), CategoryIndex::default());
        let frame = VideoFrame::new(0, 2, 2, PixelFormat::Rgb24, vec![0; 12]);

        let (processor, result) = process_frame(state.new_processor(), frame).await?;

        assert!(matches!(result, Err(ProcessError::Model(_))));
        assert_eq!(processor.frames_processed(), 0);

        Ok(())
    }
}
