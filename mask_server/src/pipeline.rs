//! Inference and annotation of a single frame.
//!
//! `annotate` runs the detector on an image, keeps the best detections above the confidence
//! threshold and burns boxes with `"<label> <score>"` captions into the image in place.
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use lazy_static::lazy_static;
use rusttype::Scale;

use crate::{
    categories::CategoryIndex,
    error::{ModelError, ProcessError},
    nn::{Detector, NormalizedBox, RawDetections},
};

const LABEL_SCALE: f32 = 16.0;
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// One valid detection with an integer class id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: NormalizedBox,
    pub class_id: i64,
    pub score: f32,
}

/// Box corners in absolute pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

/// A detection that was drawn onto the image.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawnDetection {
    pub class_id: i64,
    pub score: f32,
    pub label: String,
    pub rect: PixelBox,
}

/// Run the detector on `image` and draw the selected detections into it.
///
/// At most `max_boxes` detections with a score of at least `confidence_threshold` are drawn, in
/// the order the model ranks them. Every selected class id must be present in `categories`;
/// otherwise nothing is drawn and a configuration error is returned.
pub fn annotate(
    image: &mut RgbImage,
    model: &dyn Detector,
    categories: &CategoryIndex,
    confidence_threshold: f32,
    max_boxes: usize,
) -> Result<Vec<DrawnDetection>, ProcessError> {
    let raw = model.detect(image)?;
    let detections = valid_detections(raw)?;
    let selected = select_detections(&detections, confidence_threshold, max_boxes);

    // Resolve all labels up front so a missing category leaves the image untouched
    let labelled = selected
        .into_iter()
        .map(|detection| {
            categories
                .label(detection.class_id)
                .map(|name| (detection, format!("{} {:.2}", name, detection.score)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (width, height) = image.dimensions();
    let drawn = labelled
        .into_iter()
        .map(|(detection, label)| {
            let rect = to_pixel_box(&detection.bbox, width, height);
            draw_detection(image, &rect, &label, color_for_class(detection.class_id));
            DrawnDetection {
                class_id: detection.class_id,
                score: detection.score,
                label,
                rect,
            }
        })
        .collect::<Vec<_>>();

    log::debug!(
        "Drew {} of {} detections",
        drawn.len(),
        detections.len()
    );

    Ok(drawn)
}

/// Truncate the fixed-capacity model output to its valid entries.
pub fn valid_detections(raw: RawDetections) -> Result<Vec<Detection>, ModelError> {
    let count = raw.num_detections;
    if raw.boxes.len() < count || raw.classes.len() < count || raw.scores.len() < count {
        return Err(ModelError::Malformed(format!(
            "{count} detections reported but only {} boxes, {} classes and {} scores present",
            raw.boxes.len(),
            raw.classes.len(),
            raw.scores.len()
        )));
    }

    Ok(raw
        .boxes
        .into_iter()
        .zip(raw.classes)
        .zip(raw.scores)
        .take(count)
        .map(|((bbox, class_id), score)| Detection {
            bbox,
            class_id: class_id as i64,
            score,
        })
        .collect())
}

/// Take the first `max_boxes` detections whose score reaches the threshold.
pub fn select_detections(
    detections: &[Detection],
    confidence_threshold: f32,
    max_boxes: usize,
) -> Vec<Detection> {
    detections
        .iter()
        .filter(|detection| detection.score >= confidence_threshold)
        .take(max_boxes)
        .copied()
        .collect()
}

/// Scale a normalized box to the pixel grid of a `width` x `height` image.
pub fn to_pixel_box(bbox: &NormalizedBox, width: u32, height: u32) -> PixelBox {
    let (width, height) = (width as f32, height as f32);
    PixelBox {
        x_min: bbox.x_min * width,
        y_min: bbox.y_min * height,
        x_max: bbox.x_max * width,
        y_max: bbox.y_max * height,
    }
}

/// Box colour per class.
pub fn color_for_class(class_id: i64) -> Rgb<u8> {
    match class_id {
        1 => Rgb([0, 255, 0]),
        2 => Rgb([255, 0, 0]),
        3 => Rgb([255, 165, 0]),
        _ => Rgb([255, 255, 0]),
    }
}

/// Draw a two pixel wide box and its caption.
fn draw_detection(frame: &mut RgbImage, rect: &PixelBox, label: &str, color: Rgb<u8>) {
    // Coordinate frame basis is on the top left corner
    let (x_tl, y_tl) = (rect.x_min.round() as i32, rect.y_min.round() as i32);
    let rect_width = ((rect.x_max - rect.x_min).round() as u32).max(1);
    let rect_height = ((rect.y_max - rect.y_min).round() as u32).max(1);

    draw_hollow_rect_mut(
        frame,
        Rect::at(x_tl, y_tl).of_size(rect_width, rect_height),
        color,
    );
    if rect_width > 2 && rect_height > 2 {
        draw_hollow_rect_mut(
            frame,
            Rect::at(x_tl + 1, y_tl + 1).of_size(rect_width - 2, rect_height - 2),
            color,
        );
    }

    let scale = Scale::uniform(LABEL_SCALE);
    let (text_width, text_height) = text_size(scale, &DEJAVU_MONO, label);
    let (text_width, text_height) = (text_width.max(1), text_height.max(1));

    // Caption above the box if it fits, inside otherwise
    let y_label = match y_tl - text_height {
        y if y >= 0 => y,
        _ => y_tl.max(0),
    };
    let x_label = x_tl.max(0);

    draw_filled_rect_mut(
        frame,
        Rect::at(x_label, y_label).of_size(text_width as u32, text_height as u32),
        color,
    );
    draw_text_mut(
        frame,
        TEXT_COLOR,
        x_label,
        y_label,
        scale,
        &DEJAVU_MONO,
        label,
    );
}

lazy_static! {
    static ref DEJAVU_MONO: rusttype::Font<'static> = {
        let font_data: &[u8] = include_bytes!("../resources/DejaVuSansMono.ttf");
        let font: rusttype::Font<'static> =
            rusttype::Font::try_from_bytes(font_data).expect("failed to load font");
        font
    };
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{error::ConfigError, testing::FixedDetector};

    /// Three detections ranked by the model: without_mask 0.9, with_mask 0.6, incorrect 0.3.
    fn ranked_detections() -> RawDetections {
        RawDetections {
            boxes: vec![
                NormalizedBox::new(0.25, 0.5, 0.75, 0.9),
                NormalizedBox::new(0.05, 0.3, 0.2, 0.6),
                NormalizedBox::new(0.8, 0.3, 0.95, 0.5),
                NormalizedBox::new(0.0, 0.0, 0.0, 0.0),
            ],
            classes: vec![2.0, 1.0, 3.0, 0.0],
            scores: vec![0.9, 0.6, 0.3, 0.0],
            num_detections: 3,
        }
    }

    fn run(
        raw: RawDetections,
        threshold: f32,
        max_boxes: usize,
    ) -> (RgbImage, Result<Vec<DrawnDetection>, ProcessError>) {
        let mut image = RgbImage::new(200, 100);
        let detector = FixedDetector::new(raw);
        let result = annotate(
            &mut image,
            &detector,
            &CategoryIndex::default(),
            threshold,
            max_boxes,
        );
        (image, result)
    }

    fn labels(drawn: &[DrawnDetection]) -> Vec<&str> {
        drawn.iter().map(|d| d.label.as_str()).collect()
    }

    #[test]
    fn test_single_best_box() -> Result<(), ProcessError> {
        let (image, drawn) = run(ranked_detections(), 0.5, 1);
        let drawn = drawn?;

        assert_eq!(labels(&drawn), vec!["without_mask 0.90"]);
        assert_eq!(image.dimensions(), (200, 100));

        Ok(())
    }

    #[test]
    fn test_threshold_above_all_scores() -> Result<(), ProcessError> {
        let (image, drawn) = run(ranked_detections(), 0.95, 5);

        assert!(drawn?.is_empty());
        assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));

        Ok(())
    }

    #[test]
    fn test_top_two_in_rank_order() -> Result<(), ProcessError> {
        let (_, drawn) = run(ranked_detections(), 0.0, 2);

        assert_eq!(
            labels(&drawn?),
            vec!["without_mask 0.90", "with_mask 0.60"]
        );

        Ok(())
    }

    #[test]
    fn test_model_rank_wins_over_score() -> Result<(), ProcessError> {
        let raw = RawDetections {
            boxes: vec![
                NormalizedBox::new(0.1, 0.1, 0.4, 0.4),
                NormalizedBox::new(0.5, 0.5, 0.9, 0.9),
            ],
            classes: vec![1.0, 2.0],
            scores: vec![0.6, 0.9],
            num_detections: 2,
        };

        let (_, drawn) = run(raw.clone(), 0.5, 1);
        assert_eq!(labels(&drawn?), vec!["with_mask 0.60"]);

        let (_, drawn) = run(raw, 0.5, 2);
        assert_eq!(labels(&drawn?), vec!["with_mask 0.60", "without_mask 0.90"]);

        Ok(())
    }

    #[test]
    fn test_unknown_class_draws_nothing() {
        let mut raw = ranked_detections();
        raw.classes[1] = 99.0;

        let (image, drawn) = run(raw, 0.5, 5);

        assert!(matches!(
            drawn,
            Err(ProcessError::Config(ConfigError::UnknownClass(99)))
        ));
        assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_unknown_class_below_threshold_is_ignored() -> Result<(), ProcessError> {
        let mut raw = ranked_detections();
        raw.classes[2] = 99.0;

        let (_, drawn) = run(raw, 0.5, 5);
        assert_eq!(drawn?.len(), 2);

        Ok(())
    }

    #[test]
    fn test_box_pixels_are_drawn() -> Result<(), ProcessError> {
        let (image, drawn) = run(ranked_detections(), 0.5, 1);
        let drawn = drawn?;
        let color = color_for_class(2);

        assert_eq!(
            drawn[0].rect,
            PixelBox {
                x_min: 50.0,
                y_min: 50.0,
                x_max: 150.0,
                y_max: 90.0
            }
        );
        // left and bottom edges
        assert_eq!(image.get_pixel(50, 70), &color);
        assert_eq!(image.get_pixel(100, 89), &color);
        // inside and outside the box
        assert_eq!(image.get_pixel(100, 70), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(5, 95), &Rgb([0, 0, 0]));

        Ok(())
    }

    #[test]
    fn test_selection_is_top_k_above_threshold() {
        let detections = valid_detections(ranked_detections()).expect("valid output");

        for threshold in [0.0, 0.3, 0.5, 0.6, 0.61, 0.9, 0.95] {
            let eligible = detections
                .iter()
                .filter(|d| d.score >= threshold)
                .count();
            for max_boxes in 1..=5 {
                let selected = select_detections(&detections, threshold, max_boxes);

                assert_eq!(selected.len(), eligible.min(max_boxes));
                assert!(selected.iter().all(|d| d.score >= threshold));
                assert_eq!(&selected[..], &detections[..selected.len()]);
            }
        }
    }

    #[test]
    fn test_truncates_to_valid_count() -> Result<(), ModelError> {
        let detections = valid_detections(ranked_detections())?;

        assert_eq!(detections.len(), 3);
        assert_eq!(
            detections.iter().map(|d| d.class_id).collect::<Vec<_>>(),
            vec![2, 1, 3]
        );

        Ok(())
    }

    #[test]
    fn test_count_larger_than_output() {
        let mut raw = ranked_detections();
        raw.num_detections = 10;

        assert!(matches!(
            valid_detections(raw),
            Err(ModelError::Malformed(_))
        ));
    }

    #[test]
    fn test_model_error_propagates() {
        let mut image = RgbImage::new(8, 8);
        let result = annotate(
            &mut image,
            &crate::testing::FailingDetector,
            &CategoryIndex::default(),
            0.5,
            1,
        );

        assert!(matches!(result, Err(ProcessError::Model(_))));
    }

    #[test]
    fn test_pixel_box_scaling() {
        let bbox = NormalizedBox::new(0.1, 0.25, 0.9, 0.75);
        let rect = to_pixel_box(&bbox, 640, 480);

        assert!((rect.x_min - 64.0).abs() < 1e-4);
        assert!((rect.y_min - 120.0).abs() < 1e-4);
        assert!((rect.x_max - 576.0).abs() < 1e-4);
        assert!((rect.y_max - 360.0).abs() < 1e-4);
    }

    #[test]
    fn test_box_outside_image_is_clipped() -> Result<(), ProcessError> {
        let raw = RawDetections {
            boxes: vec![NormalizedBox::new(-0.2, 0.9, 1.3, 1.5)],
            classes: vec![1.0],
            scores: vec![0.99],
            num_detections: 1,
        };
        let (image, drawn) = run(raw, 0.5, 1);

        assert_eq!(drawn?.len(), 1);
        assert_eq!(image.dimensions(), (200, 100));

        Ok(())
    }
}
