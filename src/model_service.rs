use crate::labels::ClassLabels;
use image::RgbImage;
use thiserror::Error;

/// A single model output, corners in original image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("session mutex poisoned: {0}")]
    Poisoned(String),
    #[error("invalid tensor shape: {0}")]
    Shape(String),
}

pub trait ModelService: Send + Sync + 'static {
    fn predict(&self, image: &RgbImage) -> Result<Vec<RawDetection>, ModelError>;
    fn labels(&self) -> &ClassLabels;
}
