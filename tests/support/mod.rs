//! Shared test doubles for integration tests

#![allow(dead_code)]

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use visiontool::vision::{DetectionBox, DetectionFrame, Detector, DetectorLoader};

pub const LABELS: [&str; 4] = ["person", "bicycle", "car", "dog"];

/// Detector that returns fixed frames for any existing file
pub struct FakeDetector {
    frames: Vec<DetectionFrame>,
}

impl Detector for FakeDetector {
    fn detect(&self, image_path: &Path) -> Result<Vec<DetectionFrame>> {
        if !image_path.is_file() {
            bail!("No such file: {}", image_path.display());
        }
        Ok(self.frames.clone())
    }

    fn class_name(&self, class_id: usize) -> Option<&str> {
        LABELS.get(class_id).copied()
    }
}

/// Loader that counts how often a detector is built
pub struct FakeLoader {
    pub loads: AtomicUsize,
    frames: Vec<DetectionFrame>,
}

impl FakeLoader {
    /// One frame per slice, each box tagged with the given class index
    pub fn with_frames(frames: &[&[usize]]) -> Arc<Self> {
        let frames = frames
            .iter()
            .map(|ids| {
                DetectionFrame::new(ids.iter().map(|&id| DetectionBox::new(id, 0.8)).collect())
            })
            .collect();
        Arc::new(Self {
            loads: AtomicUsize::new(0),
            frames,
        })
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl DetectorLoader for FakeLoader {
    fn load(&self, _identifier: &str) -> Result<Arc<dyn Detector>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeDetector {
            frames: self.frames.clone(),
        }))
    }
}

/// Writes an empty placeholder image file and returns its path
pub fn image_in(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, b"not really a jpeg").unwrap();
    path
}
