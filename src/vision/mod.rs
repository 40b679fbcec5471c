//! Object detection
//!
//! A [`Detector`] turns an image file into [`DetectionFrame`]s whose boxes
//! carry class indices into the detector's label table. A [`DetectorLoader`]
//! builds a detector from a model identifier; the detection tool calls it at
//! most once per tool instance.

pub mod coco;
mod model;
mod yolo;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use yolo::{cached_weights, resolve_weights, ModelSize, WeightsSource, YoloV8Detector, YoloV8Loader};

/// A single detected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    /// Index into the detector's label table
    pub class_id: usize,
    pub confidence: f32,
    /// Corners in original image pixels
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl DetectionBox {
    pub fn new(class_id: usize, confidence: f32) -> Self {
        Self {
            class_id,
            confidence,
            xmin: 0.0,
            ymin: 0.0,
            xmax: 0.0,
            ymax: 0.0,
        }
    }
}

/// All boxes produced for one input image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionFrame {
    pub boxes: Vec<DetectionBox>,
}

impl DetectionFrame {
    pub fn new(boxes: Vec<DetectionBox>) -> Self {
        Self { boxes }
    }
}

pub trait Detector: Send + Sync {
    /// Runs inference on the image at `image_path`
    fn detect(&self, image_path: &Path) -> Result<Vec<DetectionFrame>>;

    /// Resolves a class index to its label
    fn class_name(&self, class_id: usize) -> Option<&str>;
}

pub trait DetectorLoader: Send + Sync {
    /// Builds a detector for `identifier` (e.g. `yolov8n.pt`)
    fn load(&self, identifier: &str) -> Result<Arc<dyn Detector>>;
}
