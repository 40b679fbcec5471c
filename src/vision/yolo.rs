//! YOLOv8 detector backed by candle
//!
//! Model identifiers follow the ultralytics naming (`yolov8n.pt`,
//! `yolov8s.pt`, ...). PyTorch checkpoints can't be loaded here, so a named
//! variant resolves to the equivalent safetensors export on the Hugging Face
//! Hub. A path to a local `.safetensors` file is used directly.

use super::model::{Multiples, YoloV8};
use super::{coco, DetectionBox, DetectionFrame, Detector, DetectorLoader};
use anyhow::{bail, Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::object_detection::{non_maximum_suppression, Bbox};
use hf_hub::{api::sync::Api, Cache, Repo, RepoType};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const WEIGHTS_REPO: &str = "lmz/candle-yolo-v8";

/// Longest image side fed to the network
const INPUT_SIZE: usize = 640;
/// Input sides must be multiples of the largest feature stride
const STRIDE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSize {
    N,
    S,
    M,
    L,
    X,
}

impl ModelSize {
    /// Parses a variant from a model name such as `yolov8n` or `YOLOv8x`
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        match name.strip_prefix("yolov8")? {
            "n" => Some(Self::N),
            "s" => Some(Self::S),
            "m" => Some(Self::M),
            "l" => Some(Self::L),
            "x" => Some(Self::X),
            _ => None,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Self::N => "n",
            Self::S => "s",
            Self::M => "m",
            Self::L => "l",
            Self::X => "x",
        }
    }

    pub fn multiples(self) -> Multiples {
        match self {
            Self::N => Multiples::n(),
            Self::S => Multiples::s(),
            Self::M => Multiples::m(),
            Self::L => Multiples::l(),
            Self::X => Multiples::x(),
        }
    }

    pub fn hub_filename(self) -> String {
        format!("yolov8{}.safetensors", self.suffix())
    }
}

/// Where the weights for a model identifier come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightsSource {
    Local(PathBuf),
    Hub { repo: String, filename: String },
}

/// Maps a model identifier to its variant and weights location.
pub fn resolve_weights(identifier: &str) -> Result<(ModelSize, WeightsSource)> {
    let path = Path::new(identifier);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let size = ModelSize::from_name(stem);

    if extension.as_deref() == Some("safetensors") && path.is_file() {
        let Some(size) = size else {
            bail!(
                "Cannot infer the YOLOv8 variant of '{}': name the file yolov8{{n,s,m,l,x}}.safetensors",
                identifier
            );
        };
        return Ok((size, WeightsSource::Local(path.to_path_buf())));
    }

    match (size, extension.as_deref()) {
        (Some(size), None | Some("pt") | Some("safetensors")) => Ok((
            size,
            WeightsSource::Hub {
                repo: WEIGHTS_REPO.to_string(),
                filename: size.hub_filename(),
            },
        )),
        _ => bail!(
            "Unsupported detection model '{}': expected yolov8{{n,s,m,l,x}}[.pt] or a .safetensors file",
            identifier
        ),
    }
}

fn fetch_weights(source: &WeightsSource) -> Result<PathBuf> {
    match source {
        WeightsSource::Local(path) => Ok(path.clone()),
        WeightsSource::Hub { repo, filename } => {
            info!("Fetching {} from {}", filename, repo);
            let api = Api::new().context("Failed to initialize Hugging Face API")?;
            let repo = api.repo(Repo::new(repo.clone(), RepoType::Model));
            repo.get(filename)
                .with_context(|| format!("Failed to download {}", filename))
        }
    }
}

/// Weights already on disk for `source`, without downloading
pub fn cached_weights(source: &WeightsSource) -> Option<PathBuf> {
    match source {
        WeightsSource::Local(path) => path.is_file().then(|| path.clone()),
        WeightsSource::Hub { repo, filename } => Cache::from_env()
            .repo(Repo::new(repo.clone(), RepoType::Model))
            .get(filename),
    }
}

fn select_device() -> candle_core::Result<Device> {
    if cfg!(feature = "cuda") {
        Device::cuda_if_available(0)
    } else if cfg!(feature = "metal") {
        Device::metal_if_available(0)
    } else {
        Ok(Device::Cpu)
    }
}

/// Network input size for an image: longest side scaled to 640, both sides
/// rounded to a multiple of 32.
fn input_dims(width: usize, height: usize) -> (usize, usize) {
    let round = |v: usize| (v / STRIDE * STRIDE).max(STRIDE);
    if width >= height {
        let h = height * INPUT_SIZE / width.max(1);
        (INPUT_SIZE, round(h))
    } else {
        let w = width * INPUT_SIZE / height.max(1);
        (round(w), INPUT_SIZE)
    }
}

pub struct YoloV8Detector {
    model: YoloV8,
    device: Device,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl YoloV8Detector {
    pub fn load(
        weights: &Path,
        size: ModelSize,
        confidence_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Self> {
        let device = select_device()?;
        debug!("Loading {} on {:?}", weights.display(), device);

        // SAFETY: the weights file is not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)? };
        Self::from_var_builder(vb, size, confidence_threshold, iou_threshold)
            .with_context(|| format!("Invalid YOLOv8 weights in {}", weights.display()))
    }

    fn from_var_builder(
        vb: VarBuilder,
        size: ModelSize,
        confidence_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Self> {
        let device = vb.device().clone();
        let model = YoloV8::load(vb, size.multiples(), coco::NAMES.len())?;

        Ok(Self {
            model,
            device,
            confidence_threshold,
            iou_threshold,
        })
    }

    fn preprocess(&self, image: &DynamicImage) -> Result<Tensor> {
        let (width, height) = input_dims(image.width() as usize, image.height() as usize);
        let resized = image
            .resize_exact(
                width as u32,
                height as u32,
                image::imageops::FilterType::CatmullRom,
            )
            .to_rgb8();
        let data = resized.into_raw();
        let tensor = Tensor::from_vec(data, (height, width, 3), &self.device)?
            .permute((2, 0, 1))?
            .unsqueeze(0)?
            .to_dtype(DType::F32)?;
        Ok((tensor * (1. / 255.))?)
    }
}

impl Detector for YoloV8Detector {
    fn detect(&self, image_path: &Path) -> Result<Vec<DetectionFrame>> {
        let image = image::open(image_path)
            .with_context(|| format!("Failed to open image {}", image_path.display()))?;
        let input = self.preprocess(&image)?;
        let (_, _, input_h, input_w) = input.dims4()?;

        let pred = self.model.forward(&input)?.squeeze(0)?;
        let scale = (
            image.width() as f32 / input_w as f32,
            image.height() as f32 / input_h as f32,
        );
        let boxes = postprocess(
            &pred,
            self.confidence_threshold,
            self.iou_threshold,
            scale,
            (image.width() as f32, image.height() as f32),
        )?;

        debug!("{} boxes in {}", boxes.len(), image_path.display());
        Ok(vec![DetectionFrame::new(boxes)])
    }

    fn class_name(&self, class_id: usize) -> Option<&str> {
        coco::NAMES.get(class_id).copied()
    }
}

/// Turns raw `(4 + classes, anchors)` predictions into boxes in original
/// image pixels, sorted by descending confidence.
fn postprocess(
    pred: &Tensor,
    confidence_threshold: f32,
    iou_threshold: f32,
    scale: (f32, f32),
    bounds: (f32, f32),
) -> Result<Vec<DetectionBox>> {
    let (channels, _anchors) = pred.dims2()?;
    if channels <= 4 {
        bail!("Unexpected prediction shape {:?}", pred.dims());
    }
    let num_classes = channels - 4;
    let rows = pred.t()?.contiguous()?.to_vec2::<f32>()?;

    let mut per_class: Vec<Vec<Bbox<usize>>> = (0..num_classes).map(|_| vec![]).collect();
    for row in rows {
        let (class_id, confidence) = row[4..]
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (idx, score)| {
                if score > best.1 {
                    (idx, score)
                } else {
                    best
                }
            });
        if confidence < confidence_threshold {
            continue;
        }
        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        per_class[class_id].push(Bbox {
            xmin: cx - w / 2.,
            ymin: cy - h / 2.,
            xmax: cx + w / 2.,
            ymax: cy + h / 2.,
            confidence,
            data: class_id,
        });
    }

    non_maximum_suppression(&mut per_class, iou_threshold);

    let (sx, sy) = scale;
    let (max_x, max_y) = bounds;
    let mut boxes: Vec<DetectionBox> = per_class
        .into_iter()
        .flatten()
        .map(|b| DetectionBox {
            class_id: b.data,
            confidence: b.confidence,
            xmin: (b.xmin * sx).clamp(0., max_x),
            ymin: (b.ymin * sy).clamp(0., max_y),
            xmax: (b.xmax * sx).clamp(0., max_x),
            ymax: (b.ymax * sy).clamp(0., max_y),
        })
        .collect();
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    Ok(boxes)
}

/// Loads [`YoloV8Detector`]s, downloading hub weights on first use
#[derive(Debug, Clone)]
pub struct YoloV8Loader {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl YoloV8Loader {
    pub fn new(confidence_threshold: f32, iou_threshold: f32) -> Self {
        Self {
            confidence_threshold,
            iou_threshold,
        }
    }
}

impl DetectorLoader for YoloV8Loader {
    fn load(&self, identifier: &str) -> Result<Arc<dyn Detector>> {
        let (size, source) = resolve_weights(identifier)?;
        let weights = fetch_weights(&source)?;
        info!(
            "Loading YOLOv8{} detector from {}",
            size.suffix(),
            weights.display()
        );
        let detector = YoloV8Detector::load(
            &weights,
            size,
            self.confidence_threshold,
            self.iou_threshold,
        )?;
        Ok(Arc::new(detector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_model_size_from_name() {
        assert_eq!(ModelSize::from_name("yolov8n"), Some(ModelSize::N));
        assert_eq!(ModelSize::from_name("YOLOv8x"), Some(ModelSize::X));
        assert_eq!(ModelSize::from_name("yolov8"), None);
        assert_eq!(ModelSize::from_name("yolov5s"), None);
        assert_eq!(ModelSize::from_name("yolov8nano"), None);
    }

    #[test]
    fn test_pt_identifier_maps_to_hub() {
        let (size, source) = resolve_weights("yolov8n.pt").unwrap();
        assert_eq!(size, ModelSize::N);
        assert_eq!(
            source,
            WeightsSource::Hub {
                repo: WEIGHTS_REPO.to_string(),
                filename: "yolov8n.safetensors".to_string(),
            }
        );

        let (size, _) = resolve_weights("yolov8m").unwrap();
        assert_eq!(size, ModelSize::M);
    }

    #[test]
    fn test_local_safetensors_used_directly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("yolov8s.safetensors");
        std::fs::write(&path, b"").unwrap();

        let (size, source) = resolve_weights(path.to_str().unwrap()).unwrap();
        assert_eq!(size, ModelSize::S);
        assert_eq!(source, WeightsSource::Local(path));
    }

    #[test]
    fn test_local_safetensors_needs_variant_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.safetensors");
        std::fs::write(&path, b"").unwrap();

        let err = resolve_weights(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("Cannot infer"));
    }

    #[test]
    fn test_cached_local_weights() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("yolov8n.safetensors");
        assert_eq!(cached_weights(&WeightsSource::Local(path.clone())), None);

        std::fs::write(&path, b"").unwrap();
        assert_eq!(
            cached_weights(&WeightsSource::Local(path.clone())),
            Some(path)
        );
    }

    #[test]
    fn test_unsupported_identifier() {
        assert!(resolve_weights("resnet50.onnx").is_err());
        assert!(resolve_weights("yolov8n.onnx").is_err());
    }

    #[test]
    fn test_input_dims() {
        assert_eq!(input_dims(1280, 720), (640, 352));
        assert_eq!(input_dims(480, 640), (480, 640));
        assert_eq!(input_dims(640, 640), (640, 640));
        assert_eq!(input_dims(2000, 10), (640, 32));
    }

    fn zero_detector(confidence_threshold: f32) -> YoloV8Detector {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        YoloV8Detector::from_var_builder(vb, ModelSize::N, confidence_threshold, 0.7).unwrap()
    }

    fn write_png(dir: &TempDir, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.path().join(name);
        image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 128])
        })
        .save(&path)
        .unwrap();
        path
    }

    #[test]
    fn test_detect_decodes_png_and_runs_network() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "street.png", 100, 70);
        let detector = zero_detector(0.25);

        let frames = detector.detect(&path).unwrap();

        assert_eq!(frames.len(), 1);
        for b in &frames[0].boxes {
            assert!(b.class_id < coco::NAMES.len());
            assert!(b.confidence >= 0.25);
            assert!(0.0 <= b.xmin && b.xmin <= b.xmax && b.xmax <= 100.0);
            assert!(0.0 <= b.ymin && b.ymin <= b.ymax && b.ymax <= 70.0);
        }
        let confidences: Vec<f32> = frames[0].boxes.iter().map(|b| b.confidence).collect();
        assert!(confidences.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_detect_single_pixel_image() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "dot.png", 1, 1);
        // Zero weights score every class at 0.5.
        let detector = zero_detector(0.6);

        let frames = detector.detect(&path).unwrap();

        assert_eq!(frames, vec![DetectionFrame::default()]);
    }

    #[test]
    fn test_detect_corrupt_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();
        let detector = zero_detector(0.25);

        let err = detector.detect(&path).unwrap_err();

        assert!(format!("{:#}", err).starts_with("Failed to open image"));
        assert!(detector.detect(&dir.path().join("missing.png")).is_err());
    }

    #[test]
    fn test_class_names() {
        let detector = zero_detector(0.25);
        assert_eq!(detector.class_name(0), Some("person"));
        assert_eq!(detector.class_name(80), None);
    }

    fn prediction(rows: &[[f32; 6]]) -> Tensor {
        // Two classes: 4 box values then 2 scores per anchor.
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Tensor::from_vec(flat, (rows.len(), 6), &Device::Cpu)
            .unwrap()
            .t()
            .unwrap()
    }

    #[test]
    fn test_postprocess_thresholds_and_nms() {
        let pred = prediction(&[
            [50., 50., 20., 20., 0.9, 0.1],
            // Overlaps the first box heavily; suppressed.
            [51., 51., 20., 20., 0.8, 0.0],
            [200., 200., 40., 40., 0.05, 0.6],
            // Below the confidence threshold.
            [300., 300., 10., 10., 0.1, 0.2],
        ]);

        let boxes = postprocess(&pred, 0.25, 0.7, (1.0, 1.0), (640., 640.)).unwrap();

        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].class_id, 0);
        assert!((boxes[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(boxes[1].class_id, 1);
        assert_eq!(boxes[1].xmin, 180.);
        assert_eq!(boxes[1].ymax, 220.);
    }

    #[test]
    fn test_postprocess_rescales_and_clamps() {
        let pred = prediction(&[[10., 10., 40., 40., 0.0, 0.7]]);

        let boxes = postprocess(&pred, 0.25, 0.7, (2.0, 0.5), (1000., 1000.)).unwrap();

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].xmin, 0.);
        assert_eq!(boxes[0].xmax, 60.);
        assert_eq!(boxes[0].ymax, 15.);
    }

    #[test]
    fn test_postprocess_empty_when_nothing_confident() {
        let pred = prediction(&[[10., 10., 5., 5., 0.1, 0.1]]);
        let boxes = postprocess(&pred, 0.25, 0.7, (1.0, 1.0), (64., 64.)).unwrap();
        assert!(boxes.is_empty());
    }
}
