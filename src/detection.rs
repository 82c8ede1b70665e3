use crate::{
    annotate::{Annotator, Overlay},
    image_codec::{self, CodecError},
    model_service::{ModelError, ModelService, RawDetection},
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    /// `[x, y, width, height]`, top-left origin.
    pub bbox: [i32; 4],
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub annotated_image: String,
}

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Model not loaded on server")]
    ServerNotReady,
    #[error("No image file provided")]
    MissingInput,
    #[error("upload exceeds the body limit: {0}")]
    UploadTooLarge(String),
    #[error("failed to read upload: {0}")]
    Upload(String),
    #[error("image decode failed: {0}")]
    Decode(CodecError),
    #[error("inference failed: {0}")]
    Inference(#[from] ModelError),
    #[error("image encode failed: {0}")]
    Encode(CodecError),
    #[error("detection task failed: {0}")]
    Task(String),
}

/// Corners go through `as i32`, truncating toward zero.
fn to_overlay(raw: &RawDetection, label: String) -> Overlay {
    Overlay {
        x1: raw.x1 as i32,
        y1: raw.y1 as i32,
        x2: raw.x2 as i32,
        y2: raw.y2 as i32,
        label,
        confidence: raw.confidence,
    }
}

fn to_detection(overlay: &Overlay) -> Detection {
    Detection {
        class_name: overlay.label.clone(),
        confidence: overlay.confidence,
        bbox: [
            overlay.x1,
            overlay.y1,
            overlay.x2 - overlay.x1,
            overlay.y2 - overlay.y1,
        ],
    }
}

pub struct DetectionHandler<M: ModelService> {
    model: Option<Arc<M>>,
    annotator: Arc<Annotator>,
    jpeg_quality: u8,
}

impl<M: ModelService> Clone for DetectionHandler<M> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            annotator: self.annotator.clone(),
            jpeg_quality: self.jpeg_quality,
        }
    }
}

impl<M: ModelService> DetectionHandler<M> {
    pub fn new(model: Option<M>, annotator: Annotator, jpeg_quality: u8) -> Self {
        Self {
            model: model.map(Arc::new),
            annotator: Arc::new(annotator),
            jpeg_quality,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    pub fn detect(&self, image_bytes: Option<&[u8]>) -> Result<DetectionResult, DetectError> {
        let model = self.model.as_ref().ok_or(DetectError::ServerNotReady)?;
        let image_bytes = image_bytes.ok_or(DetectError::MissingInput)?;

        let image = image_codec::decode(image_bytes).map_err(DetectError::Decode)?;
        let raw_detections = model.predict(&image)?;

        let labels = model.labels();
        let overlays: Vec<Overlay> = raw_detections
            .iter()
            .map(|raw| to_overlay(raw, labels.name(raw.class_id)))
            .collect();
        let detections: Vec<Detection> = overlays.iter().map(to_detection).collect();

        tracing::debug!("Returning {} detections", detections.len());
        for (i, detection) in detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: class={}, confidence={:.3}, bbox={:?}",
                i,
                detection.class_name,
                detection.confidence,
                detection.bbox
            );
        }

        let annotated = self.annotator.annotate(&image, &overlays);
        let annotated_image =
            image_codec::to_data_uri(&annotated, self.jpeg_quality).map_err(DetectError::Encode)?;

        Ok(DetectionResult {
            detections,
            annotated_image,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{image_codec::DEFAULT_JPEG_QUALITY, labels::ClassLabels};
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    pub struct MockModelService {
        detections: Vec<RawDetection>,
        labels: ClassLabels,
    }

    impl MockModelService {
        pub fn new(detections: Vec<RawDetection>) -> Self {
            Self {
                detections,
                labels: ClassLabels::new(vec!["helmet".to_string(), "vest".to_string()]),
            }
        }
    }

    impl ModelService for MockModelService {
        fn predict(&self, image: &RgbImage) -> Result<Vec<RawDetection>, ModelError> {
            let (w, h) = (image.width() as f32, image.height() as f32);
            Ok(self
                .detections
                .iter()
                .map(|d| RawDetection {
                    x1: d.x1.min(w),
                    y1: d.y1.min(h),
                    x2: d.x2.min(w),
                    y2: d.y2.min(h),
                    ..*d
                })
                .collect())
        }

        fn labels(&self) -> &ClassLabels {
            &self.labels
        }
    }

    pub struct FailingModelService {
        labels: ClassLabels,
    }

    impl ModelService for FailingModelService {
        fn predict(&self, _image: &RgbImage) -> Result<Vec<RawDetection>, ModelError> {
            Err(ModelError::Shape("broken head".to_string()))
        }

        fn labels(&self) -> &ClassLabels {
            &self.labels
        }
    }

    pub fn sample_detections() -> Vec<RawDetection> {
        vec![
            RawDetection {
                class_id: 1,
                confidence: 0.91,
                x1: 10.7,
                y1: 20.2,
                x2: 100.9,
                y2: 150.5,
            },
            RawDetection {
                class_id: 0,
                confidence: 0.42,
                x1: 200.0,
                y1: 50.0,
                x2: 300.0,
                y2: 200.0,
            },
            RawDetection {
                class_id: 9,
                confidence: 0.3,
                x1: 600.0,
                y1: 400.0,
                x2: 640.0,
                y2: 480.0,
            },
        ]
    }

    pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 90])
        });
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    fn handler<M: ModelService>(model: Option<M>) -> DetectionHandler<M> {
        DetectionHandler::new(model, Annotator::new().unwrap(), DEFAULT_JPEG_QUALITY)
    }

    #[test]
    fn test_detect_shapes_results() {
        let handler = handler(Some(MockModelService::new(sample_detections())));

        let result = handler.detect(Some(jpeg_bytes(640, 480).as_slice())).unwrap();

        assert_eq!(result.detections.len(), 3);
        assert_eq!(
            result.detections[0],
            Detection {
                class_name: "vest".to_string(),
                confidence: 0.91,
                bbox: [10, 20, 90, 130],
            }
        );
        assert_eq!(result.detections[1].class_name, "helmet");
        assert_eq!(result.detections[1].bbox, [200, 50, 100, 150]);
        assert_eq!(result.detections[2].class_name, "9");
        assert!(result.annotated_image.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_detect_boxes_within_bounds() {
        let handler = handler(Some(MockModelService::new(sample_detections())));

        let result = handler.detect(Some(jpeg_bytes(640, 480).as_slice())).unwrap();

        assert!(!result.detections.is_empty());
        for detection in &result.detections {
            let [x, y, w, h] = detection.bbox;
            assert!(x >= 0 && y >= 0);
            assert!(w >= 0 && h >= 0);
            assert!(x + w <= 640 && y + h <= 480);
            assert!((0.0..=1.0).contains(&detection.confidence));
        }
    }

    #[test]
    fn test_detect_keeps_model_order() {
        let mut raw = sample_detections();
        raw.reverse();
        let handler = handler(Some(MockModelService::new(raw)));

        let result = handler.detect(Some(jpeg_bytes(640, 480).as_slice())).unwrap();

        let confidences: Vec<f32> = result.detections.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.3, 0.42, 0.91]);
    }

    #[test]
    fn test_detect_is_idempotent() {
        let handler = handler(Some(MockModelService::new(sample_detections())));
        let bytes = jpeg_bytes(320, 240);

        let first = handler.detect(Some(bytes.as_slice())).unwrap();
        let second = handler.detect(Some(bytes.as_slice())).unwrap();

        assert_eq!(first.detections, second.detections);
    }

    #[test]
    fn test_detect_without_detections() {
        let handler = handler(Some(MockModelService::new(vec![])));

        let result = handler.detect(Some(jpeg_bytes(64, 64).as_slice())).unwrap();

        assert!(result.detections.is_empty());
        assert!(result.annotated_image.len() > "data:image/jpeg;base64,".len());
    }

    #[test]
    fn test_detect_without_model() {
        let handler = handler::<MockModelService>(None);

        assert!(!handler.is_ready());
        let result = handler.detect(None);
        assert!(matches!(result, Err(DetectError::ServerNotReady)));
    }

    #[test]
    fn test_detect_missing_input() {
        let handler = handler(Some(MockModelService::new(vec![])));

        let result = handler.detect(None);

        assert!(matches!(result, Err(DetectError::MissingInput)));
    }

    #[test]
    fn test_detect_invalid_image() {
        let handler = handler(Some(MockModelService::new(vec![])));

        let result = handler.detect(Some(&b"not an image"[..]));

        assert!(matches!(result, Err(DetectError::Decode(_))));
    }

    #[test]
    fn test_detect_inference_failure() {
        let handler = handler(Some(FailingModelService {
            labels: ClassLabels::default(),
        }));

        let result = handler.detect(Some(jpeg_bytes(32, 32).as_slice()));

        assert!(matches!(result, Err(DetectError::Inference(_))));
    }
}
