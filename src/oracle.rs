//! Suggestion oracle: the boundary to the object detector.
//!
//! A detector is anything implementing [`DetectionModel`]. Whatever it
//! returns is validated exactly once, in [`suggest`], before it reaches an
//! annotation session.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::path::Path;
use std::time::Instant;

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::bbox::{Annotation, BoundingBox, PixelRect};
use crate::classes::ClassStore;
use crate::coco_parser::{CocoDataset, CocoDetection};
use crate::file_io::ImageRef;

pub type DetectionError = Box<dyn StdError + Send + Sync>;

/// One detector output record.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    /// Normalized center-form box
    pub bbox: BoundingBox,
    pub score: f32,
}

/// An object detector that proposes boxes for an image.
pub trait DetectionModel {
    /// Short name used in log messages.
    fn name(&self) -> &str;

    fn detect(&self, image: &ImageRef) -> Result<Vec<Detection>, DetectionError>;
}

/// Run the detector once on `image` and turn its output into suggested
/// annotations.
///
/// Detections with non-finite values or no area after clipping to the image
/// are dropped, as are detections scoring below `min_score`. Labels are
/// resolved against `classes`; unknown labels go to the default class.
pub fn suggest(
    model: &dyn DetectionModel,
    image: &ImageRef,
    classes: &ClassStore,
    min_score: f32,
) -> Result<Vec<Annotation>, DetectionError> {
    let start = Instant::now();
    let detections = model.detect(image)?;
    debug!(
        "{} returned {} detections for {} in {:.2}ms",
        model.name(),
        detections.len(),
        image.name(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    let total = detections.len();
    let suggestions: Vec<Annotation> = detections
        .into_iter()
        .filter_map(|detection| validate_detection(detection, classes, min_score))
        .collect();

    if suggestions.len() < total {
        debug!(
            "Dropped {} of {} detections for {}",
            total - suggestions.len(),
            total,
            image.name()
        );
    }
    Ok(suggestions)
}

fn validate_detection(
    detection: Detection,
    classes: &ClassStore,
    min_score: f32,
) -> Option<Annotation> {
    if !detection.bbox.is_finite() || !detection.score.is_finite() {
        warn!("Ignoring non-finite detection {:?}", detection);
        return None;
    }
    if detection.score < min_score {
        return None;
    }

    let bbox = detection.bbox.clipped();
    if bbox.validate().is_err() {
        debug!("Ignoring degenerate detection {:?}", detection.bbox);
        return None;
    }

    let class_uid = classes.resolve_label(&detection.label);
    Some(Annotation::suggested(class_uid, bbox, detection.score))
}

/// Returns the same fixed boxes for every image.
///
/// Boxes are given as pixel corners `[x1, y1, x2, y2]` relative to the
/// detector input size, the way a detector working on resized input reports
/// them.
#[derive(Debug, Clone)]
pub struct MockModel {
    boxes: Vec<[f64; 4]>,
    labels: Vec<String>,
    scores: Vec<f32>,
    input_size: (u32, u32),
}

impl MockModel {
    /// `scores` defaults to 1.0 for every box when `None`.
    pub fn new(
        boxes: Vec<[f64; 4]>,
        labels: Vec<String>,
        scores: Option<Vec<f32>>,
        input_size: (u32, u32),
    ) -> Self {
        let scores = scores.unwrap_or_else(|| vec![1.0; boxes.len()]);
        Self {
            boxes,
            labels,
            scores,
            input_size,
        }
    }
}

impl DetectionModel for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    fn detect(&self, _image: &ImageRef) -> Result<Vec<Detection>, DetectionError> {
        let (input_width, input_height) = self.input_size;
        Ok(self
            .boxes
            .iter()
            .zip(&self.labels)
            .zip(&self.scores)
            .map(|((corners, label), score)| {
                let [x1, y1, x2, y2] = *corners;
                Detection {
                    label: label.clone(),
                    bbox: PixelRect::from_corners(x1, y1, x2, y2)
                        .normalize(input_width, input_height),
                    score: *score,
                }
            })
            .collect())
    }
}

/// Serves detections that an external detector wrote to a COCO file ahead
/// of time, looked up by image file name.
#[derive(Debug, Clone, Default)]
pub struct CocoResultsModel {
    detections: HashMap<String, Vec<CocoDetection>>,
}

impl CocoResultsModel {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        info!("Loading detections from {}", path.display());
        let dataset = CocoDataset::from_file(path)?;
        Ok(Self::from_dataset(dataset))
    }

    pub fn from_dataset(mut dataset: CocoDataset) -> Self {
        let (skipped_count, warnings) = dataset.validate_and_clean();
        if skipped_count > 0 {
            warn!("Skipped {} invalid detection(s)", skipped_count);
            for warning in &warnings {
                warn!("{}", warning);
            }
        }

        info!(
            "Detections loaded: {} images, {} detections, {} categories",
            dataset.images.len(),
            dataset.annotations.len(),
            dataset.categories.len()
        );

        Self {
            detections: dataset.build_detection_map(),
        }
    }

    pub fn image_count(&self) -> usize {
        self.detections.len()
    }
}

impl DetectionModel for CocoResultsModel {
    fn name(&self) -> &str {
        "coco-results"
    }

    fn detect(&self, image: &ImageRef) -> Result<Vec<Detection>, DetectionError> {
        let Some(detections) = self.detections.get(image.name()) else {
            return Ok(Vec::new());
        };

        Ok(detections
            .iter()
            .map(|det| {
                // Prefer the size the detector saw; fall back to the file on disk.
                let (width, height) = match det.image_size {
                    (w, h) if w > 0 && h > 0 => (w, h),
                    _ => image.dimensions(),
                };
                let [x, y, w, h] = det.bbox;
                Detection {
                    label: det.category_name.clone(),
                    bbox: PixelRect::new(x, y, w, h).normalize(width, height),
                    score: det.score,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BoxGeometry;

    struct FailingModel;

    impl DetectionModel for FailingModel {
        fn name(&self) -> &str {
            "failing"
        }

        fn detect(&self, image: &ImageRef) -> Result<Vec<Detection>, DetectionError> {
            Err(format!("cannot run on {}", image.name()).into())
        }
    }

    fn classes() -> ClassStore {
        ClassStore::from_names(&["none", "buoy", "boat"]).unwrap()
    }

    #[test]
    fn test_mock_model_normalizes_against_input_size() {
        let model = MockModel::new(
            vec![[64.0, 64.0, 128.0, 192.0]],
            vec!["boat".to_string()],
            None,
            (640, 640),
        );
        let image = ImageRef::new("a.jpg", 1920, 1080);
        let detections = model.detect(&image).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].score, 1.0);
        assert!((detections[0].bbox.x_center - 0.15).abs() < 1e-12);
        assert!((detections[0].bbox.y_center - 0.2).abs() < 1e-12);
        assert!((detections[0].bbox.width - 0.1).abs() < 1e-12);
        assert!((detections[0].bbox.height - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_suggest_filters_and_maps_labels() {
        let model = MockModel::new(
            vec![
                [0.0, 0.0, 10.0, 10.0],
                [10.0, 10.0, 20.0, 20.0],
                [30.0, 30.0, 30.0, 40.0],
                [90.0, 90.0, 110.0, 110.0],
            ],
            vec!["boat".into(), "whale".into(), "boat".into(), "buoy".into()],
            Some(vec![0.9, 0.5, 0.9, 0.1]),
            (100, 100),
        );
        let image = ImageRef::new("a.jpg", 100, 100);

        let all = suggest(&model, &image, &classes(), 0.0).unwrap();
        // zero-width box dropped, out-of-bounds box clipped
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].class_uid, 2);
        assert_eq!(all[1].class_uid, 0);
        assert_eq!(all[2].class_uid, 1);
        match all[2].geometry {
            BoxGeometry::Normalized(bbox) => assert!(bbox.validate().is_ok()),
            BoxGeometry::Pixel(_) => panic!("suggestions are normalized"),
        }

        let confident = suggest(&model, &image, &classes(), 0.6).unwrap();
        assert_eq!(confident.len(), 1);
        assert_eq!(confident[0].score, Some(0.9));
    }

    #[test]
    fn test_suggest_propagates_model_errors() {
        let image = ImageRef::new("a.jpg", 100, 100);
        let err = suggest(&FailingModel, &image, &classes(), 0.0).unwrap_err();
        assert!(err.to_string().contains("a.jpg"));
    }

    #[test]
    fn test_coco_results_model_uses_recorded_or_actual_size() {
        let dataset = CocoDataset::from_str(
            r#"{
                "images": [
                    {"id": 1, "file_name": "a.jpg", "width": 200, "height": 100},
                    {"id": 2, "file_name": "b.jpg"}
                ],
                "annotations": [
                    {"id": 1, "image_id": 1, "category_id": 1, "bbox": [50.0, 25.0, 100.0, 50.0], "score": 0.7},
                    {"id": 2, "image_id": 2, "category_id": 1, "bbox": [0.0, 0.0, 10.0, 10.0]}
                ],
                "categories": [{"id": 1, "name": "buoy"}]
            }"#,
        )
        .unwrap();
        let model = CocoResultsModel::from_dataset(dataset);
        assert_eq!(model.image_count(), 2);

        let a = model.detect(&ImageRef::new("/data/a.jpg", 400, 200)).unwrap();
        assert_eq!(a[0].bbox, BoundingBox::new(0.5, 0.5, 0.5, 0.5));
        assert_eq!(a[0].label, "buoy");

        let b = model.detect(&ImageRef::new("/data/b.jpg", 20, 20)).unwrap();
        assert_eq!(b[0].bbox, BoundingBox::new(0.25, 0.25, 0.5, 0.5));
        assert_eq!(b[0].score, 1.0);

        assert!(model.detect(&ImageRef::new("/data/c.jpg", 20, 20)).unwrap().is_empty());
    }
}
