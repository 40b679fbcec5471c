//! Object detection tool
//!
//! Wraps a [`Detector`] behind the [`Tool`] interface. The detector is loaded
//! on first use and reused afterwards. Every failure is folded into the
//! returned text so the agent always gets something to read.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use super::trait_def::Tool;
use crate::vision::{Detector, DetectorLoader};

pub const TOOL_NAME: &str = "Object Detection Tool";
pub const TOOL_DESCRIPTION: &str = "A tool that uses the YOLOv8 model to detect objects in an image. It takes an image path as input and returns a list of detected objects and their counts.";

const REPORT_HEADER: &str = "Detected objects:";
const ERROR_PREFIX: &str = "Error analyzing image: ";

/// Class name → count, in order of first occurrence
pub type ClassCounts = Vec<(String, usize)>;

#[derive(Clone)]
pub struct ObjectDetectionTool {
    loader: Arc<dyn DetectorLoader>,
    identifier: String,
    model: Arc<Mutex<Option<Arc<dyn Detector>>>>,
}

impl ObjectDetectionTool {
    pub fn new(loader: Arc<dyn DetectorLoader>, identifier: impl Into<String>) -> Self {
        Self {
            loader,
            identifier: identifier.into(),
            model: Arc::new(Mutex::new(None)),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_loaded(&self) -> bool {
        self.model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Analyzes one image and returns the report, or the error line.
    /// Blocks until inference completes.
    pub fn run(&self, image_path: &str) -> String {
        match self.try_run(image_path) {
            Ok(report) => report,
            Err(e) => {
                warn!(image = image_path, error = %e, "Image analysis failed");
                error_line(&e)
            }
        }
    }

    pub fn try_run(&self, image_path: &str) -> Result<String> {
        let detector = self.detector()?;
        let frames = detector.detect(Path::new(image_path))?;

        let mut labels = Vec::new();
        for frame in &frames {
            for detection in &frame.boxes {
                let name = detector
                    .class_name(detection.class_id)
                    .ok_or_else(|| anyhow!("unknown class index {}", detection.class_id))?;
                labels.push(name.to_string());
            }
        }

        debug!(image = image_path, detections = labels.len(), "Inference finished");
        Ok(render_report(&count_labels(labels)))
    }

    /// Returns the detector, loading it on first call. The lock is held
    /// across the check and the load. A loader that panicked left the slot
    /// empty, so a poisoned lock is simply retried.
    fn detector(&self) -> Result<Arc<dyn Detector>> {
        let mut slot = self.model.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(detector) = slot.as_ref() {
            return Ok(Arc::clone(detector));
        }

        info!(model = %self.identifier, "Loading detection model");
        let detector = self
            .loader
            .load(&self.identifier)
            .with_context(|| format!("Failed to load model {}", self.identifier))?;
        *slot = Some(Arc::clone(&detector));
        Ok(detector)
    }
}

/// Aggregates labels into counts, keeping first-occurrence order
pub fn count_labels<I, S>(labels: I) -> ClassCounts
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut counts: ClassCounts = Vec::new();
    for label in labels {
        let label = label.into();
        match counts.iter_mut().find(|(name, _)| *name == label) {
            Some((_, count)) => *count += 1,
            None => counts.push((label, 1)),
        }
    }
    counts
}

pub fn render_report(counts: &[(String, usize)]) -> String {
    let mut lines = vec![REPORT_HEADER.to_string()];
    lines.extend(counts.iter().map(|(name, count)| format!("- {}: {}", name, count)));
    lines.join("\n")
}

/// Single-line error text returned in place of a report
pub fn error_line(error: &anyhow::Error) -> String {
    let message = format!("{:#}", error).replace(['\r', '\n'], " ");
    format!("{}{}", ERROR_PREFIX, message)
}

#[async_trait]
impl Tool for ObjectDetectionTool {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn description(&self) -> &'static str {
        TOOL_DESCRIPTION
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "image_path": {
                    "type": "string",
                    "description": "The absolute path to the image file to analyze."
                }
            },
            "required": ["image_path"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        let image_path = arguments["image_path"]
            .as_str()
            .ok_or_else(|| anyhow!("Missing required string argument 'image_path'"))?
            .to_string();

        let tool = self.clone();
        let report = tokio::task::spawn_blocking(move || tool.run(&image_path))
            .await
            .context("Detection task panicked")?;

        Ok(Value::String(report))
    }

    /// Error lines are not cached, so a failed load or a file that appears
    /// later gets another attempt.
    fn is_cacheable(&self, output: &Value) -> bool {
        !output.as_str().is_some_and(|text| text.starts_with(ERROR_PREFIX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolRegistry, ToolSystem};
    use crate::vision::{DetectionBox, DetectionFrame};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NAMES: [&str; 3] = ["person", "car", "dog"];

    struct FixedDetector {
        frames: Vec<DetectionFrame>,
    }

    impl Detector for FixedDetector {
        fn detect(&self, image_path: &Path) -> Result<Vec<DetectionFrame>> {
            if !image_path.exists() {
                anyhow::bail!("{} does not exist", image_path.display());
            }
            Ok(self.frames.clone())
        }

        fn class_name(&self, class_id: usize) -> Option<&str> {
            NAMES.get(class_id).copied()
        }
    }

    struct CountingLoader {
        loads: AtomicUsize,
        frames: Vec<DetectionFrame>,
    }

    impl CountingLoader {
        fn new(class_ids: &[usize]) -> Arc<Self> {
            let boxes = class_ids
                .iter()
                .map(|&id| DetectionBox::new(id, 0.9))
                .collect();
            Arc::new(Self {
                loads: AtomicUsize::new(0),
                frames: vec![DetectionFrame::new(boxes)],
            })
        }
    }

    impl DetectorLoader for CountingLoader {
        fn load(&self, _identifier: &str) -> Result<Arc<dyn Detector>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FixedDetector {
                frames: self.frames.clone(),
            }))
        }
    }

    struct FailingLoader;

    impl DetectorLoader for FailingLoader {
        fn load(&self, identifier: &str) -> Result<Arc<dyn Detector>> {
            anyhow::bail!("weights for {} not found", identifier)
        }
    }

    /// Fails the first load, succeeds afterwards
    struct FlakyLoader {
        attempts: AtomicUsize,
    }

    impl DetectorLoader for FlakyLoader {
        fn load(&self, _identifier: &str) -> Result<Arc<dyn Detector>> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("connection reset while downloading weights");
            }
            Ok(Arc::new(FixedDetector {
                frames: vec![DetectionFrame::new(vec![DetectionBox::new(2, 0.8)])],
            }))
        }
    }

    /// Panics on the first load, succeeds afterwards
    struct PanickingLoader {
        attempts: AtomicUsize,
    }

    impl DetectorLoader for PanickingLoader {
        fn load(&self, _identifier: &str) -> Result<Arc<dyn Detector>> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("weights file truncated");
            }
            Ok(Arc::new(FixedDetector {
                frames: vec![DetectionFrame::new(vec![DetectionBox::new(0, 0.8)])],
            }))
        }
    }

    fn image_file() -> tempfile::NamedTempFile {
        tempfile::Builder::new().suffix(".jpg").tempfile().unwrap()
    }

    #[test]
    fn test_count_labels_first_occurrence_order() {
        let counts = count_labels(["dog", "person", "dog", "car", "person", "dog"]);
        assert_eq!(
            counts,
            vec![
                ("dog".to_string(), 3),
                ("person".to_string(), 2),
                ("car".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_render_report() {
        let report = render_report(&[("person".to_string(), 2), ("car".to_string(), 1)]);
        assert_eq!(report, "Detected objects:\n- person: 2\n- car: 1");
        assert_eq!(render_report(&[]), "Detected objects:");
    }

    #[test]
    fn test_run_counts_classes() {
        let image = image_file();
        let loader = CountingLoader::new(&[1, 0, 1, 1, 2]);
        let tool = ObjectDetectionTool::new(loader, "yolov8n.pt");

        let report = tool.run(image.path().to_str().unwrap());

        assert_eq!(report, "Detected objects:\n- car: 3\n- person: 1\n- dog: 1");
        let total: usize = report
            .lines()
            .skip(1)
            .filter_map(|l| l.rsplit(": ").next()?.parse::<usize>().ok())
            .sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_run_no_detections() {
        let image = image_file();
        let tool = ObjectDetectionTool::new(CountingLoader::new(&[]), "yolov8n.pt");

        assert_eq!(tool.run(image.path().to_str().unwrap()), "Detected objects:");
    }

    #[test]
    fn test_run_missing_file() {
        let tool = ObjectDetectionTool::new(CountingLoader::new(&[0]), "yolov8n.pt");

        let report = tool.run("/nonexistent/street.jpg");

        assert!(report.starts_with("Error analyzing image: "));
        assert_eq!(report.lines().count(), 1);
        assert!(report.contains("/nonexistent/street.jpg"));
    }

    #[test]
    fn test_loads_model_once() {
        let image = image_file();
        let loader = CountingLoader::new(&[0]);
        let tool = ObjectDetectionTool::new(loader.clone(), "yolov8n.pt");
        assert!(!tool.is_loaded());

        tool.run(image.path().to_str().unwrap());
        tool.run("/nonexistent/other.jpg");
        tool.clone().run(image.path().to_str().unwrap());

        assert!(tool.is_loaded());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_repeated_runs_identical() {
        let image = image_file();
        let tool = ObjectDetectionTool::new(CountingLoader::new(&[2, 2, 0]), "yolov8n.pt");
        let path = image.path().to_str().unwrap();

        assert_eq!(tool.run(path), tool.run(path));
    }

    #[test]
    fn test_load_failure_is_reported() {
        let tool = ObjectDetectionTool::new(Arc::new(FailingLoader), "yolov9q.pt");

        let report = tool.run("/tmp/any.jpg");

        assert_eq!(
            report,
            "Error analyzing image: Failed to load model yolov9q.pt: weights for yolov9q.pt not found"
        );
        assert!(!tool.is_loaded());
    }

    #[test]
    fn test_retries_load_after_panic() {
        let image = image_file();
        let path = image.path().to_str().unwrap().to_string();
        let tool = ObjectDetectionTool::new(
            Arc::new(PanickingLoader {
                attempts: AtomicUsize::new(0),
            }),
            "yolov8n.pt",
        );

        let first = {
            let tool = tool.clone();
            let path = path.clone();
            std::thread::spawn(move || tool.run(&path)).join()
        };
        assert!(first.is_err());
        assert!(!tool.is_loaded());

        assert_eq!(tool.run(&path), "Detected objects:\n- person: 1");
        assert!(tool.is_loaded());
    }

    #[tokio::test]
    async fn test_error_reports_are_not_cached() {
        let image = image_file();
        let tool: Arc<dyn Tool> = Arc::new(ObjectDetectionTool::new(
            Arc::new(FlakyLoader {
                attempts: AtomicUsize::new(0),
            }),
            "yolov8n.pt",
        ));
        let system = ToolSystem::new(ToolRegistry::new(vec![tool]));
        let args = json!({ "image_path": image.path().to_str().unwrap() });

        let first = system.execute(TOOL_NAME, args.clone()).await.unwrap();
        assert!(first.as_str().unwrap().starts_with("Error analyzing image: "));
        assert_eq!(system.cache_size(), 0);

        let second = system.execute(TOOL_NAME, args.clone()).await.unwrap();
        assert_eq!(second, json!("Detected objects:\n- dog: 1"));
        assert_eq!(system.cache_size(), 1);

        let third = system.execute("object_detection_tool", args).await.unwrap();
        assert_eq!(third, second);
    }

    #[test]
    fn test_unknown_class_index_is_reported() {
        let image = image_file();
        let tool = ObjectDetectionTool::new(CountingLoader::new(&[0, 42]), "yolov8n.pt");

        let report = tool.run(image.path().to_str().unwrap());

        assert_eq!(report, "Error analyzing image: unknown class index 42");
    }

    #[test]
    fn test_error_line_is_single_line() {
        let err = anyhow!("first\nsecond");
        assert_eq!(error_line(&err), "Error analyzing image: first second");
    }

    #[tokio::test]
    async fn test_execute_returns_report() {
        let image = image_file();
        let tool = ObjectDetectionTool::new(CountingLoader::new(&[0, 0]), "yolov8n.pt");

        let result = tool
            .execute(json!({ "image_path": image.path().to_str().unwrap() }))
            .await
            .unwrap();

        assert_eq!(result, json!("Detected objects:\n- person: 2"));
    }

    #[tokio::test]
    async fn test_execute_requires_image_path() {
        let tool = ObjectDetectionTool::new(CountingLoader::new(&[]), "yolov8n.pt");

        assert!(tool.execute(json!({})).await.is_err());
        assert!(tool.execute(json!({ "image_path": 7 })).await.is_err());
    }

    #[test]
    fn test_metadata() {
        let tool = ObjectDetectionTool::new(CountingLoader::new(&[]), "yolov8n.pt");
        assert_eq!(tool.name(), "Object Detection Tool");
        assert!(tool.description().contains("YOLOv8"));
        assert_eq!(tool.schema()["required"], json!(["image_path"]));
        assert!(tool.schema()["properties"]["image_path"]["description"]
            .as_str()
            .unwrap()
            .contains("absolute path"));
        assert_eq!(tool.function_name(), "object_detection_tool");
    }
}
