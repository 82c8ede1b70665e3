use crate::{
    config::ModelConfig,
    labels::ClassLabels,
    model_service::{ModelError, ModelService, RawDetection},
};
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, ArrayViewD, Axis, Ix3, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

fn intersection(box1: &RawDetection, box2: &RawDetection) -> f32 {
    let width = (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.);
    let height = (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.);
    width * height
}

fn union(box1: &RawDetection, box2: &RawDetection) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

fn iou(box1: &RawDetection, box2: &RawDetection) -> f32 {
    let union = union(box1, box2);
    if union <= 0. {
        return 0.;
    }
    intersection(box1, box2) / union
}

fn transform_image(image: &RgbImage, input_size: u32) -> Array<f32, Ix4> {
    let size = input_size as usize;
    let img = image::imageops::resize(image, input_size, input_size, FilterType::CatmullRom);

    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

#[derive(Debug, Clone, Copy)]
pub struct PostprocessParams {
    pub input_size: u32,
    pub min_probability: f32,
    pub iou_threshold: f32,
}

impl From<&ModelConfig> for PostprocessParams {
    fn from(config: &ModelConfig) -> Self {
        Self {
            input_size: config.input_size,
            min_probability: config.min_probability,
            iou_threshold: config.iou_threshold,
        }
    }
}

/// Decodes a `[1, 4 + classes, anchors]` YOLOv8 head into boxes in original
/// image space, most confident first, after class-aware NMS.
pub fn postprocess(
    output: ArrayViewD<f32>,
    img_width: u32,
    img_height: u32,
    params: &PostprocessParams,
) -> Result<Vec<RawDetection>, ModelError> {
    if output.ndim() != 3 || output.shape()[0] != 1 || output.shape()[1] <= 4 {
        return Err(ModelError::Shape(format!(
            "expected [1, 4 + classes, anchors], got {:?}",
            output.shape()
        )));
    }

    let (w_img, h_img) = (img_width as f32, img_height as f32);
    let scale = params.input_size as f32;
    let output = output
        .into_dimensionality::<Ix3>()
        .map_err(|e| ModelError::Shape(e.to_string()))?;
    let output = output.index_axis(Axis(0), 0);

    let mut boxes = Vec::new();
    for row in output.t().axis_iter(Axis(0)) {
        let Some((class_id, prob)) = row
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
        else {
            continue;
        };

        if prob < params.min_probability {
            continue;
        }

        let xc = row[0] / scale * w_img;
        let yc = row[1] / scale * h_img;
        let w = row[2] / scale * w_img;
        let h = row[3] / scale * h_img;

        boxes.push(RawDetection {
            class_id,
            confidence: prob.clamp(0., 1.),
            x1: (xc - w / 2.).clamp(0., w_img),
            y1: (yc - h / 2.).clamp(0., h_img),
            x2: (xc + w / 2.).clamp(0., w_img),
            y2: (yc + h / 2.).clamp(0., h_img),
        });
    }

    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut result: Vec<RawDetection> = Vec::new();
    for candidate in boxes {
        let suppressed = result.iter().any(|kept| {
            kept.class_id == candidate.class_id && iou(kept, &candidate) >= params.iou_threshold
        });
        if !suppressed {
            result.push(candidate);
        }
    }

    Ok(result)
}

pub struct OrtModelService {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
    labels: ClassLabels,
    params: PostprocessParams,
}

fn build_session(model_path: &Path) -> Result<Session, ort::Error> {
    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "tensorrt")]
    let builder = builder.with_execution_providers([
        ort::execution_providers::TensorRTExecutionProvider::default()
            .with_engine_cache(true)
            .build(),
    ])?;

    builder.commit_from_file(model_path)
}

/// Reads the class table from the `names` metadata entry, if the export
/// carries one.
pub fn metadata_labels(session: &Session) -> Option<ClassLabels> {
    let metadata = session.metadata().ok()?;
    let raw = metadata.custom("names").ok()??;
    ClassLabels::from_metadata(&raw)
}

impl OrtModelService {
    /// `labels` of `None` means the table is taken from the model metadata.
    pub fn new(
        model_path: &Path,
        labels: Option<ClassLabels>,
        model_config: &ModelConfig,
    ) -> Result<Self, ModelError> {
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| build_session(model_path))
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!("Created {} ONNX sessions", num_instances);

        let labels = match labels {
            Some(labels) => labels,
            None => metadata_labels(&sessions[0]).unwrap_or_default(),
        };
        if labels.is_empty() {
            tracing::warn!("No class labels available, falling back to class indices");
        } else {
            tracing::info!("Loaded {} class labels", labels.len());
        }

        Ok(Self {
            sessions: sessions.into_iter().map(Mutex::new).collect(),
            counter: AtomicUsize::new(0),
            labels,
            params: PostprocessParams::from(model_config),
        })
    }

    pub fn run_inference(
        &self,
        input: &Array<f32, Ix4>,
    ) -> Result<ndarray::ArrayD<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())?;
        let outputs = session.run(ort::inputs![tensor_ref])?;

        let (shape, data) = outputs["output0"].try_extract_tensor::<f32>()?;

        let ix = shape.to_ixdyn();
        let array = ndarray::ArrayD::from_shape_vec(ix, data.to_vec())
            .map_err(|e| ModelError::Shape(e.to_string()))?;

        Ok(array)
    }
}

impl ModelService for OrtModelService {
    fn predict(&self, image: &RgbImage) -> Result<Vec<RawDetection>, ModelError> {
        let input = transform_image(image, self.params.input_size);
        let outputs = self.run_inference(&input)?;

        postprocess(outputs.view(), image.width(), image.height(), &self.params)
    }

    fn labels(&self) -> &ClassLabels {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use ndarray::{Array3, IxDyn};

    const PARAMS: PostprocessParams = PostprocessParams {
        input_size: 640,
        min_probability: 0.25,
        iou_threshold: 0.7,
    };

    // Columns are anchors: xc, yc, w, h, then one score per class.
    fn head(anchors: &[[f32; 6]]) -> ndarray::ArrayD<f32> {
        let mut output = Array3::<f32>::zeros((1, 6, anchors.len()));
        for (a, anchor) in anchors.iter().enumerate() {
            for (c, value) in anchor.iter().enumerate() {
                output[[0, c, a]] = *value;
            }
        }
        output.into_dyn()
    }

    #[test]
    fn test_transform_image() {
        let img = RgbImage::from_pixel(100, 50, Rgb([255, 0, 0]));

        let input = transform_image(&img, 640);

        assert_eq!(input.shape(), &[1, 3, 640, 640]);
        assert!((input[[0, 0, 320, 320]] - 1.0).abs() < 1e-3);
        assert!(input[[0, 1, 320, 320]].abs() < 1e-3);
    }

    #[test]
    fn test_postprocess_scales_and_filters() {
        let output = head(&[
            [320., 320., 64., 128., 0.9, 0.1],
            [100., 100., 20., 20., 0.1, 0.2],
        ]);

        let detections = postprocess(output.view(), 1280, 320, &PARAMS).unwrap();

        assert_eq!(detections.len(), 1);
        let det = detections[0];
        assert_eq!(det.class_id, 0);
        assert!((det.confidence - 0.9).abs() < 1e-6);
        assert!((det.x1 - 576.).abs() < 1e-3);
        assert!((det.x2 - 704.).abs() < 1e-3);
        assert!((det.y1 - 128.).abs() < 1e-3);
        assert!((det.y2 - 192.).abs() < 1e-3);
    }

    #[test]
    fn test_postprocess_clips_to_image() {
        let output = head(&[[10., 630., 100., 100., 0.0, 0.8]]);

        let detections = postprocess(output.view(), 640, 480, &PARAMS).unwrap();

        assert_eq!(detections.len(), 1);
        let det = detections[0];
        assert_eq!(det.class_id, 1);
        assert_eq!(det.x1, 0.);
        assert!(det.y2 <= 480.);
        assert!(det.x2 >= det.x1 && det.y2 >= det.y1);
    }

    #[test]
    fn test_postprocess_nms_is_class_aware() {
        let output = head(&[
            [100., 100., 50., 50., 0.6, 0.0],
            [101., 101., 50., 50., 0.9, 0.0],
            [100., 100., 50., 50., 0.0, 0.7],
            [400., 400., 50., 50., 0.5, 0.0],
        ]);

        let detections = postprocess(output.view(), 640, 640, &PARAMS).unwrap();

        let confidences: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7, 0.5]);
        assert_eq!(detections[1].class_id, 1);
    }

    #[test]
    fn test_postprocess_empty_head() {
        let output = ndarray::ArrayD::<f32>::zeros(IxDyn(&[1, 6, 0]));
        let detections = postprocess(output.view(), 640, 480, &PARAMS).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn test_postprocess_rejects_bad_shape() {
        let output = ndarray::ArrayD::<f32>::zeros(IxDyn(&[6, 10]));
        let result = postprocess(output.view(), 640, 480, &PARAMS);
        assert!(matches!(result, Err(ModelError::Shape(_))));
    }
}
