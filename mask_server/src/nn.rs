//! Detection model provider.
//!
//! The model is an object detector exported from the TensorFlow Object Detection API to ONNX. It
//! takes a `uint8[1, H, W, 3]` batch and yields fixed-capacity outputs together with the number of
//! valid detections:
//!
//! - `detection_boxes`: `[1, N, 4]` normalized boxes
//! - `detection_classes`: `[1, N]` class ids stored as floats
//! - `detection_scores`: `[1, N]` confidences, sorted in descending order
//! - `num_detections`: `[1]`
//!
//! The model is loaded once at startup and shared between all connections.
use std::path::PathBuf;

use clap::ValueEnum;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::error::ModelError;

type NnModel = TypedRunnableModel<TypedModel>;

/// Bounding box in coordinates relative to image width and height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl NormalizedBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }
}

/// Coordinate order of the four box values emitted by the model.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, ValueEnum)]
pub enum BoxLayout {
    /// `[y_min, x_min, y_max, x_max]` as emitted by TensorFlow detectors
    #[default]
    Yxyx,
    /// `[x_min, y_min, x_max, y_max]`
    Xyxy,
}

impl BoxLayout {
    pub fn to_box(&self, raw: &[f32]) -> NormalizedBox {
        match self {
            BoxLayout::Yxyx => NormalizedBox::new(raw[1], raw[0], raw[3], raw[2]),
            BoxLayout::Xyxy => NormalizedBox::new(raw[0], raw[1], raw[2], raw[3]),
        }
    }
}

/// Raw per-frame model output, before truncation to the valid count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetections {
    pub boxes: Vec<NormalizedBox>,
    pub classes: Vec<f32>,
    pub scores: Vec<f32>,
    pub num_detections: usize,
}

/// Anything that turns an image into detections.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<RawDetections, ModelError>;
}

/// Output tensor names of the model.
#[derive(Debug, Clone)]
pub struct OutputNames {
    pub boxes: String,
    pub classes: String,
    pub scores: String,
    pub num_detections: String,
}

impl Default for OutputNames {
    fn default() -> Self {
        Self {
            boxes: "detection_boxes".into(),
            classes: "detection_classes".into(),
            scores: "detection_scores".into(),
            num_detections: "num_detections".into(),
        }
    }
}

/// Where and how to load the model.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub model_file: String,
    pub input_width: u32,
    pub input_height: u32,
    pub box_layout: BoxLayout,
    pub output_names: OutputNames,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models/face_mask"),
            model_file: "model.onnx".into(),
            input_width: 640,
            input_height: 480,
            box_layout: BoxLayout::default(),
            output_names: OutputNames::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OutputIndices {
    boxes: usize,
    classes: usize,
    scores: usize,
    num_detections: usize,
}

/// ONNX detector running on tract.
pub struct OnnxDetector {
    model: NnModel,
    width: u32,
    height: u32,
    outputs: OutputIndices,
    box_layout: BoxLayout,
}

impl OnnxDetector {
    /// Load and optimize the model from `config.model_dir`.
    pub fn load(config: &ModelConfig) -> Result<Self, ModelError> {
        let path = config.model_dir.join(&config.model_file);
        if !path.is_file() {
            return Err(ModelError::MissingModel(path));
        }
        log::info!("Loading model from {}", path.display());

        let model = tract_onnx::onnx()
            .model_for_path(&path)
            .map_err(|e| ModelError::Load(e.into()))?;

        let labels = model
            .output_outlets()
            .map_err(|e| ModelError::Load(e.into()))?
            .iter()
            .map(|outlet| {
                model
                    .outlet_label(*outlet)
                    .unwrap_or(model.node(outlet.node).name.as_str())
                    .to_owned()
            })
            .collect::<Vec<_>>();
        log::debug!("Model outputs: {:?}", &labels);

        let names = &config.output_names;
        let outputs = OutputIndices {
            boxes: output_index(&labels, &names.boxes)?,
            classes: output_index(&labels, &names.classes)?,
            scores: output_index(&labels, &names.scores)?,
            num_detections: output_index(&labels, &names.num_detections)?,
        };

        let input_fact = InferenceFact::dt_shape(
            u8::datum_type(),
            tvec!(
                1,
                config.input_height as usize,
                config.input_width as usize,
                3
            ),
        );
        let model = model
            .with_input_fact(0, input_fact)
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| ModelError::Load(e.into()))?;

        log::info!(
            "Model ready with input {}x{}",
            config.input_width,
            config.input_height
        );

        Ok(Self {
            model,
            width: config.input_width,
            height: config.input_height,
            outputs,
            box_layout: config.box_layout,
        })
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let resized: RgbImage = image::imageops::resize(
            input,
            self.width,
            self.height,
            image::imageops::FilterType::Triangle,
        );

        tract_ndarray::Array4::from_shape_fn(
            (1, self.height as usize, self.width as usize, 3),
            |(_, y, x, c)| resized[(x as _, y as _)][c],
        )
        .into()
    }

    fn postproc(&self, raw_nn_out: TVec<TValue>) -> Result<RawDetections, ModelError> {
        let boxes = output_values(&raw_nn_out, self.outputs.boxes)?;
        let classes = output_values(&raw_nn_out, self.outputs.classes)?;
        let scores = output_values(&raw_nn_out, self.outputs.scores)?;
        let num_detections = output_values(&raw_nn_out, self.outputs.num_detections)?;
        let num_detections = num_detections
            .first()
            .copied()
            .ok_or_else(|| ModelError::Malformed("empty num_detections".into()))?;

        parse_outputs(&boxes, classes, scores, num_detections, self.box_layout)
    }
}

impl Detector for OnnxDetector {
    fn detect(&self, image: &RgbImage) -> Result<RawDetections, ModelError> {
        let input = tvec!(self.preproc(image).into());
        let raw_nn_out = self
            .model
            .run(input)
            .map_err(|e| ModelError::Inference(e.into()))?;
        self.postproc(raw_nn_out)
    }
}

/// Find an output by name, accepting a TensorFlow style `:0` suffix.
fn output_index(labels: &[String], name: &str) -> Result<usize, ModelError> {
    labels
        .iter()
        .position(|label| {
            label == name
                || label
                    .strip_suffix(":0")
                    .map(|stripped| stripped == name)
                    .unwrap_or(false)
        })
        .ok_or_else(|| ModelError::MissingOutput(name.to_owned()))
}

/// Flatten one output tensor to `f32` values.
fn output_values(outputs: &TVec<TValue>, index: usize) -> Result<Vec<f32>, ModelError> {
    let tensor = outputs
        .get(index)
        .ok_or_else(|| ModelError::Malformed(format!("missing output {index}")))?;
    let tensor = tensor
        .cast_to::<f32>()
        .map_err(|e| ModelError::Inference(e.into()))?;
    let values = tensor
        .as_slice::<f32>()
        .map_err(|e| ModelError::Inference(e.into()))?;

    Ok(values.to_vec())
}

/// Assemble raw detections from flattened output tensors.
pub fn parse_outputs(
    boxes: &[f32],
    classes: Vec<f32>,
    scores: Vec<f32>,
    num_detections: f32,
    layout: BoxLayout,
) -> Result<RawDetections, ModelError> {
    if boxes.len() % 4 != 0 {
        return Err(ModelError::Malformed(format!(
            "{} box values are not a multiple of 4",
            boxes.len()
        )));
    }
    if !num_detections.is_finite() || num_detections < 0.0 {
        return Err(ModelError::Malformed(format!(
            "invalid detection count {num_detections}"
        )));
    }

    Ok(RawDetections {
        boxes: boxes.chunks_exact(4).map(|raw| layout.to_box(raw)).collect(),
        classes,
        scores,
        num_detections: num_detections as usize,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tensorflow_box_layout() {
        let bbox = BoxLayout::Yxyx.to_box(&[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(bbox, NormalizedBox::new(0.2, 0.1, 0.4, 0.3));

        let bbox = BoxLayout::Xyxy.to_box(&[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(bbox, NormalizedBox::new(0.1, 0.2, 0.3, 0.4));
    }

    #[test]
    fn test_parse_outputs() -> Result<(), ModelError> {
        let boxes = [0.0, 0.0, 0.5, 0.5, 0.1, 0.2, 0.3, 0.4, 0.0, 0.0, 0.0, 0.0];
        let raw = parse_outputs(
            &boxes,
            vec![2.0, 1.0, 0.0],
            vec![0.9, 0.6, 0.0],
            2.0,
            BoxLayout::Yxyx,
        )?;

        assert_eq!(raw.num_detections, 2);
        assert_eq!(raw.boxes.len(), 3);
        assert_eq!(raw.boxes[1], NormalizedBox::new(0.2, 0.1, 0.4, 0.3));

        Ok(())
    }

    #[test]
    fn test_parse_malformed_outputs() {
        assert!(matches!(
            parse_outputs(&[0.0; 5], vec![], vec![], 1.0, BoxLayout::Yxyx),
            Err(ModelError::Malformed(_))
        ));
        assert!(matches!(
            parse_outputs(&[0.0; 4], vec![1.0], vec![0.5], f32::NAN, BoxLayout::Yxyx),
            Err(ModelError::Malformed(_))
        ));
    }

    #[test]
    fn test_output_index() {
        let labels = vec![
            "detection_anchor_indices".to_owned(),
            "detection_boxes:0".to_owned(),
            "num_detections".to_owned(),
        ];

        assert_eq!(output_index(&labels, "detection_boxes").ok(), Some(1));
        assert_eq!(output_index(&labels, "num_detections").ok(), Some(2));
        assert!(matches!(
            output_index(&labels, "detection_scores"),
            Err(ModelError::MissingOutput(_))
        ));
    }

    #[test]
    fn test_missing_model_file() {
        let config = ModelConfig {
            model_dir: PathBuf::from("does/not/exist"),
            ..Default::default()
        };
        match OnnxDetector::load(&config) {
            Err(ModelError::MissingModel(path)) => {
                assert_eq!(path, PathBuf::from("does/not/exist/model.onnx"))
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("model should not load"),
        }
    }
}
