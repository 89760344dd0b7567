/// COCO detection file parser
///
/// Parses COCO-format files holding detector output: the usual `images`,
/// `annotations` and `categories` tables, where every annotation may carry
/// a confidence `score`.
/// Format specification: https://cocodataset.org/#format-data
use std::collections::{HashMap, HashSet};
use std::path::Path;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CocoDataset {
    pub images: Vec<CocoImage>,
    pub annotations: Vec<CocoAnnotation>,
    pub categories: Vec<CocoCategory>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CocoImage {
    pub id: u64,
    pub file_name: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CocoAnnotation {
    #[serde(default)]
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    pub bbox: Vec<f64>,  // [x, y, width, height] in pixels
    #[serde(default)]
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CocoCategory {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub supercategory: String,
}

/// One detection resolved against its image and category.
#[derive(Debug, Clone, PartialEq)]
pub struct CocoDetection {
    pub category_name: String,
    /// Pixel box: x, y (top-left), width, height
    pub bbox: [f64; 4],
    /// Missing scores count as fully confident.
    pub score: f32,
    /// Image size recorded in the file, zero when absent.
    pub image_size: (u32, u32),
}

impl CocoDataset {
    /// Parse COCO JSON from a file
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let file = std::fs::File::open(path)
            .map_err(|e| format!("Failed to read COCO file {}: {}", path.display(), e))?;

        serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| format!("Failed to parse COCO JSON {}: {}", path.display(), e))
    }

    /// Parse COCO JSON from a string
    pub fn from_str(content: &str) -> Result<Self, String> {
        serde_json::from_str(content)
            .map_err(|e| format!("Failed to parse COCO JSON: {}", e))
    }

    /// Filter out annotations that reference unknown images or categories or
    /// carry a malformed box. Returns the number of skipped annotations and
    /// one warning per problem.
    pub fn validate_and_clean(&mut self) -> (usize, Vec<String>) {
        let mut warnings = Vec::new();

        if self.images.is_empty() {
            warnings.push("COCO file has no images".to_string());
        }

        if self.categories.is_empty() {
            warnings.push("COCO file has no categories".to_string());
        }

        let image_ids: HashSet<_> = self.images.iter().map(|img| img.id).collect();
        let category_ids: HashSet<_> = self.categories.iter().map(|cat| cat.id).collect();

        let original_count = self.annotations.len();

        self.annotations.retain(|ann| {
            if !image_ids.contains(&ann.image_id) {
                warnings.push(format!(
                    "Skipping annotation {}: references non-existent image_id {}",
                    ann.id, ann.image_id
                ));
                return false;
            }
            if !category_ids.contains(&ann.category_id) {
                warnings.push(format!(
                    "Skipping annotation {}: references non-existent category_id {}",
                    ann.id, ann.category_id
                ));
                return false;
            }
            if ann.bbox.len() != 4 {
                warnings.push(format!(
                    "Skipping annotation {}: invalid bbox format (expected 4 values, got {})",
                    ann.id, ann.bbox.len()
                ));
                return false;
            }
            true
        });

        let skipped_count = original_count - self.annotations.len();
        (skipped_count, warnings)
    }

    /// Build a lookup map from file name to detections. Call
    /// `validate_and_clean` first; annotations that still do not resolve are
    /// ignored.
    pub fn build_detection_map(&self) -> HashMap<String, Vec<CocoDetection>> {
        let mut map: HashMap<String, Vec<CocoDetection>> = HashMap::new();

        let category_map: HashMap<u64, &CocoCategory> =
            self.categories.iter().map(|cat| (cat.id, cat)).collect();
        let image_map: HashMap<u64, &CocoImage> =
            self.images.iter().map(|img| (img.id, img)).collect();

        for ann in &self.annotations {
            let (Some(image), Some(category)) =
                (image_map.get(&ann.image_id), category_map.get(&ann.category_id))
            else {
                continue;
            };
            let [x, y, width, height] = match ann.bbox.as_slice() {
                &[x, y, w, h] => [x, y, w, h],
                _ => continue,
            };

            map.entry(image.file_name.clone())
                .or_default()
                .push(CocoDetection {
                    category_name: category.name.clone(),
                    bbox: [x, y, width, height],
                    score: ann.score.unwrap_or(1.0),
                    image_size: (image.width, image.height),
                });
        }

        map
    }
}
