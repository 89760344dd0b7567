/// YOLO dataset export
///
/// Writes a completed annotation set as a YOLO detection dataset:
///
/// ```text
/// <dest>/train/images/<stem>.<ext>
/// <dest>/train/labels/<stem>.txt
/// <dest>/test/images/...
/// <dest>/test/labels/...
/// <dest>/data.yaml
/// ```
///
/// Writes are sequential and not transactional. A failure part way leaves
/// the files written so far in place.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::ImageFormat;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;

#[allow(unused_imports)]
use log::{debug, info, warn};

use crate::bbox::BoundingBox;
use crate::classes::ClassStore;
use crate::error::{Error, Result};
use crate::file_io::ImageRef;
use crate::session::{AnnotationSession, AnnotationSet};

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    /// Fraction of images written to the test split, in [0, 1].
    pub test_split: f32,
    /// Seed for the train/test shuffle.
    pub seed: u64,
    /// Export only images marked ready.
    pub only_ready: bool,
    /// Resize every image to a square JPEG of this size. `None` copies the
    /// original files.
    pub image_size: Option<u32>,
    pub show_progress: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            test_split: 0.0,
            seed: 42,
            only_ready: false,
            image_size: None,
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub train_images: usize,
    pub test_images: usize,
    pub label_files: usize,
    pub boxes: usize,
    /// Images written with an empty label file
    pub background_images: usize,
    pub skipped_not_ready: usize,
}

impl ExportSummary {
    pub fn images(&self) -> usize {
        self.train_images + self.test_images
    }
}

#[derive(Debug, Serialize)]
struct DataYaml {
    path: String,
    train: String,
    val: String,
    nc: usize,
    names: BTreeMap<usize, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Split {
    Train,
    Test,
}

impl Split {
    fn dir_name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

/// Export a completed session. Fails with `SessionIncomplete` while images
/// remain to be processed; nothing is written in that case.
pub fn export_session(
    session: &AnnotationSession,
    destination: &Path,
    options: &ExportOptions,
) -> Result<ExportSummary> {
    let annotation_set = session.annotation_set()?;
    export(&annotation_set, session.classes(), destination, options)
}

pub fn export(
    annotation_set: &AnnotationSet,
    classes: &ClassStore,
    destination: &Path,
    options: &ExportOptions,
) -> Result<ExportSummary> {
    if !(0.0..=1.0).contains(&options.test_split) {
        return Err(Error::OutOfRange(format!(
            "test split must be between 0 and 1, got {}",
            options.test_split
        )));
    }
    if options.image_size == Some(0) {
        return Err(Error::OutOfRange("export image size must be at least 1".to_string()));
    }

    let mut summary = ExportSummary::default();
    let selected: Vec<usize> = (0..annotation_set.len())
        .filter(|&index| !options.only_ready || annotation_set.is_ready(index))
        .collect();
    summary.skipped_not_ready = annotation_set.len() - selected.len();
    if summary.skipped_not_ready > 0 {
        info!("Skipping {} images not marked ready", summary.skipped_not_ready);
    }

    let (train, test) = split_indices(selected, options.test_split, options.seed);
    let file_stems = unique_stems(annotation_set.images());

    info!(
        "Exporting {} train and {} test images to {}",
        train.len(),
        test.len(),
        destination.display()
    );

    let progress = if options.show_progress {
        create_progress_bar((train.len() + test.len()) as u64, "export")
    } else {
        ProgressBar::hidden()
    };

    for (split, indices) in [(Split::Train, &train), (Split::Test, &test)] {
        if indices.is_empty() && split == Split::Test {
            continue;
        }
        let images_dir = destination.join(split.dir_name()).join("images");
        let labels_dir = destination.join(split.dir_name()).join("labels");
        create_dir(&images_dir)?;
        create_dir(&labels_dir)?;

        for &index in indices.iter() {
            let image = &annotation_set.images()[index];
            let stem = &file_stems[index];

            write_image(image, &images_dir, stem, options.image_size)?;
            let label_path = labels_dir.join(format!("{}.txt", stem));
            let written = write_labels(image, annotation_set, index, classes, &label_path)?;

            summary.label_files += 1;
            summary.boxes += written;
            if written == 0 {
                summary.background_images += 1;
            }
            match split {
                Split::Train => summary.train_images += 1,
                Split::Test => summary.test_images += 1,
            }
            progress.inc(1);
        }
    }
    progress.finish_and_clear();

    write_data_yaml(destination, classes, !test.is_empty())?;

    info!(
        "Export finished: {} images, {} boxes, {} background images",
        summary.images(),
        summary.boxes,
        summary.background_images
    );
    Ok(summary)
}

/// One YOLO label line: class index and the normalized center-form box.
pub fn label_line(class_index: usize, bbox: &BoundingBox) -> String {
    format!(
        "{} {} {} {} {}",
        class_index, bbox.x_center, bbox.y_center, bbox.width, bbox.height
    )
}

/// Shuffle with a fixed seed and take the test split off the front. Both
/// splits come back in session order.
fn split_indices(mut indices: Vec<usize>, test_split: f32, seed: u64) -> (Vec<usize>, Vec<usize>) {
    if test_split <= 0.0 || indices.is_empty() {
        return (indices, Vec::new());
    }

    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let test_size = ((indices.len() as f32 * test_split).ceil() as usize).min(indices.len());
    let mut test: Vec<usize> = indices.drain(0..test_size).collect();
    let mut train = indices;
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// Output file stem per image. Stems shared by several images get the image
/// index appended, bumped further while the name is still taken. Names are
/// compared case-insensitively so the layout survives on Windows and macOS.
fn unique_stems(images: &[ImageRef]) -> Vec<String> {
    let stems: Vec<String> = images
        .iter()
        .map(|image| {
            image
                .path()
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| image.name().to_string())
        })
        .collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for stem in &stems {
        *counts.entry(stem.to_lowercase()).or_default() += 1;
    }
    let is_shared = |stem: &str| counts.get(&stem.to_lowercase()).copied().unwrap_or(0) > 1;

    // Stems that are already unique keep their name
    let mut taken: HashSet<String> = stems
        .iter()
        .filter(|stem| !is_shared(stem))
        .map(|stem| stem.to_lowercase())
        .collect();

    stems
        .iter()
        .enumerate()
        .map(|(index, stem)| {
            if !is_shared(stem) {
                return stem.clone();
            }
            let mut candidate = format!("{}_{}", stem, index);
            let mut bump = 1;
            while taken.contains(&candidate.to_lowercase()) {
                candidate = format!("{}_{}_{}", stem, index, bump);
                bump += 1;
            }
            taken.insert(candidate.to_lowercase());
            candidate
        })
        .collect()
}

fn write_image(
    image: &ImageRef,
    images_dir: &Path,
    stem: &str,
    image_size: Option<u32>,
) -> Result<PathBuf> {
    match image_size {
        Some(size) => {
            let target = images_dir.join(format!("{}.jpg", stem));
            let resized = image::open(image.path())
                .map_err(|e| Error::image(image.path(), e))?
                .resize_exact(size, size, FilterType::Triangle)
                .to_rgb8();
            resized
                .save_with_format(&target, ImageFormat::Jpeg)
                .map_err(|e| Error::image(&target, e))?;
            Ok(target)
        }
        None => {
            let target = match image.path().extension() {
                Some(ext) => images_dir.join(format!("{}.{}", stem, ext.to_string_lossy())),
                None => images_dir.join(stem),
            };
            fs::copy(image.path(), &target).map_err(|e| Error::io(image.path(), e))?;
            Ok(target)
        }
    }
}

/// Returns the number of lines written. Boxes whose class no longer exists
/// are skipped with a warning.
fn write_labels(
    image: &ImageRef,
    annotation_set: &AnnotationSet,
    index: usize,
    classes: &ClassStore,
    label_path: &Path,
) -> Result<usize> {
    let mut content = String::new();
    let mut written = 0;
    for annotation in annotation_set.get(index) {
        let Some(class_index) = classes.index_of(annotation.class_uid) else {
            warn!(
                "Skipping box with unknown class uid {} on {}",
                annotation.class_uid,
                image.name()
            );
            continue;
        };
        let bbox = annotation.normalized(image.width(), image.height());
        content.push_str(&label_line(class_index, &bbox));
        content.push('\n');
        written += 1;
    }

    fs::write(label_path, content).map_err(|e| Error::io(label_path, e))?;
    debug!("Wrote {} labels to {}", written, label_path.display());
    Ok(written)
}

fn write_data_yaml(destination: &Path, classes: &ClassStore, has_test: bool) -> Result<()> {
    let absolute = fs::canonicalize(destination).unwrap_or_else(|_| destination.to_path_buf());
    let data = DataYaml {
        path: absolute.to_string_lossy().replace('\\', "/"),
        train: "train/images".to_string(),
        val: if has_test { "test/images" } else { "train/images" }.to_string(),
        nc: classes.len(),
        names: classes
            .iter()
            .enumerate()
            .map(|(index, cls)| (index, cls.name.clone()))
            .collect(),
    };

    let yaml = serde_yaml::to_string(&data)
        .map_err(|e| Error::Settings(format!("failed to serialize data.yaml: {}", e)))?;
    let yaml_path = destination.join("data.yaml");
    fs::write(&yaml_path, yaml).map_err(|e| Error::io(&yaml_path, e))
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| Error::io(path, e))
}

fn create_progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    match ProgressStyle::default_bar().template(&format!(
        "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}})",
        label
    )) {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(e) => warn!("Invalid progress bar template: {}", e),
    }
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::{Annotation, PixelRect};
    use image::{Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> ImageRef {
        let path = dir.join(name);
        RgbImage::from_pixel(width, height, Rgb([200, 100, 50]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        ImageRef::open(&path).unwrap()
    }

    fn classes() -> ClassStore {
        ClassStore::from_names(&["buoy", "boat"]).unwrap()
    }

    fn completed_session(images: Vec<ImageRef>, boxes: Vec<Vec<Annotation>>) -> AnnotationSession {
        let mut session = AnnotationSession::new(images, classes(), None).unwrap();
        for image_boxes in boxes {
            for annotation in image_boxes {
                session.accept(annotation).unwrap();
            }
            session.advance().unwrap();
        }
        session
    }

    #[test]
    fn test_label_line_for_both_box_conventions() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let images = vec![
            write_png(input.path(), "normalized.png", 100, 100),
            write_png(input.path(), "pixel.png", 100, 100),
        ];
        let session = completed_session(
            images,
            vec![
                vec![Annotation::drawn(0, BoundingBox::new(0.5, 0.5, 0.2, 0.4))],
                vec![Annotation::drawn(0, PixelRect::new(40.0, 30.0, 20.0, 40.0))],
            ],
        );

        let summary = export_session(&session, output.path(), &ExportOptions::default()).unwrap();
        assert_eq!(summary.train_images, 2);
        assert_eq!(summary.boxes, 2);

        for stem in ["normalized", "pixel"] {
            let label_path = output.path().join(format!("train/labels/{}.txt", stem));
            let label = fs::read_to_string(label_path).unwrap();
            assert_eq!(label, "0 0.5 0.5 0.2 0.4\n");
            assert!(output.path().join(format!("train/images/{}.png", stem)).exists());
        }
        assert!(!output.path().join("test").exists());
    }

    #[test]
    fn test_export_before_complete_fails() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let images = vec![
            write_png(input.path(), "a.png", 10, 10),
            write_png(input.path(), "b.png", 10, 10),
        ];
        let mut session = AnnotationSession::new(images, classes(), None).unwrap();
        session.advance().unwrap();

        let result = export_session(&session, output.path(), &ExportOptions::default());
        assert!(matches!(result, Err(Error::SessionIncomplete { remaining: 1 })));
        assert!(!output.path().join("data.yaml").exists());
    }

    #[test]
    fn test_background_images_get_empty_label_files() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let images = vec![write_png(input.path(), "empty.png", 20, 20)];
        let session = completed_session(images, vec![vec![]]);

        let summary = export_session(&session, output.path(), &ExportOptions::default()).unwrap();
        assert_eq!(summary.background_images, 1);
        assert_eq!(summary.label_files, 1);
        let label = fs::read_to_string(output.path().join("train/labels/empty.txt")).unwrap();
        assert!(label.is_empty());
    }

    #[test]
    fn test_data_yaml_lists_classes_and_splits() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let images: Vec<ImageRef> = (0..10)
            .map(|i| write_png(input.path(), &format!("img{}.png", i), 8, 8))
            .collect();
        let session = completed_session(images, vec![vec![]; 10]);
        let options = ExportOptions {
            test_split: 0.2,
            ..ExportOptions::default()
        };

        let summary = export_session(&session, output.path(), &options).unwrap();
        assert_eq!(summary.train_images, 8);
        assert_eq!(summary.test_images, 2);
        assert_eq!(fs::read_dir(output.path().join("test/labels")).unwrap().count(), 2);

        let contents = fs::read_to_string(output.path().join("data.yaml")).unwrap();
        let yaml: serde_yaml::Value = serde_yaml::from_str(&contents).unwrap();
        assert_eq!(yaml["train"].as_str(), Some("train/images"));
        assert_eq!(yaml["val"].as_str(), Some("test/images"));
        assert_eq!(yaml["nc"].as_u64(), Some(2));
        assert_eq!(yaml["names"][0].as_str(), Some("buoy"));
        assert_eq!(yaml["names"][1].as_str(), Some("boat"));
    }

    #[test]
    fn test_split_is_deterministic_per_seed() {
        let indices: Vec<usize> = (0..20).collect();
        let first = split_indices(indices.clone(), 0.25, 7);
        let second = split_indices(indices.clone(), 0.25, 7);
        assert_eq!(first, second);
        assert_eq!(first.1.len(), 5);
        assert_eq!(split_indices(indices, 0.0, 7).1.len(), 0);
    }

    #[test]
    fn test_only_ready_and_resize() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let images = vec![
            write_png(input.path(), "a.png", 40, 20),
            write_png(input.path(), "b.png", 40, 20),
        ];
        let mut session = AnnotationSession::new(images, classes(), None).unwrap();
        session.mark_ready().unwrap();
        session.add_box(PixelRect::new(0.0, 0.0, 20.0, 10.0), Some(1)).unwrap();
        session.advance().unwrap();
        session.advance().unwrap();

        let options = ExportOptions {
            only_ready: true,
            image_size: Some(16),
            ..ExportOptions::default()
        };
        let summary = export_session(&session, output.path(), &options).unwrap();
        assert_eq!(summary.skipped_not_ready, 1);
        assert_eq!(summary.images(), 1);

        let exported = output.path().join("train/images/a.jpg");
        assert_eq!(image::image_dimensions(&exported).unwrap(), (16, 16));
        let label = fs::read_to_string(output.path().join("train/labels/a.txt")).unwrap();
        assert_eq!(label, "1 0.25 0.25 0.5 0.5\n");
        assert!(!output.path().join("train/labels/b.txt").exists());
    }

    #[test]
    fn test_colliding_stems_get_index_suffix() {
        let images = vec![
            ImageRef::new("/data/frame.png", 10, 10),
            ImageRef::new("/data/frame.jpg", 10, 10),
            ImageRef::new("/data/other.jpg", 10, 10),
        ];
        assert_eq!(unique_stems(&images), vec!["frame_0", "frame_1", "other"]);
    }

    #[test]
    fn test_index_suffix_never_reuses_an_existing_stem() {
        let images = vec![
            ImageRef::new("/data/frame.png", 10, 10),
            ImageRef::new("/data/frame_0.png", 10, 10),
            ImageRef::new("/data/frame.bmp", 10, 10),
            ImageRef::new("/data/Other.png", 10, 10),
            ImageRef::new("/data/other.jpg", 10, 10),
        ];
        let stems = unique_stems(&images);
        assert_eq!(stems[1], "frame_0");
        assert_eq!(stems[2], "frame_2");
        assert_eq!(stems[3], "Other_3");
        assert_eq!(stems[4], "other_4");

        let lowered: HashSet<String> = stems.iter().map(|stem| stem.to_lowercase()).collect();
        assert_eq!(lowered.len(), images.len());
    }

    #[test]
    fn test_colliding_stems_each_get_a_label_file() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let png_dir = input.path().join("png");
        fs::create_dir(&png_dir).unwrap();
        let images = vec![
            write_png(&png_dir, "frame.png", 10, 10),
            write_png(input.path(), "frame_0.png", 10, 10),
            write_png(input.path(), "frame.png", 10, 10),
        ];
        let boxes = (0..3)
            .map(|i| {
                let width = 0.1 * (i + 1) as f64;
                vec![Annotation::drawn(0, BoundingBox::new(0.5, 0.5, width, 0.2))]
            })
            .collect();
        let session = completed_session(images, boxes);

        let summary = export_session(&session, output.path(), &ExportOptions::default()).unwrap();
        assert_eq!(summary.label_files, 3);
        assert_eq!(fs::read_dir(output.path().join("train/labels")).unwrap().count(), 3);
        assert_eq!(fs::read_dir(output.path().join("train/images")).unwrap().count(), 3);

        let kept = fs::read_to_string(output.path().join("train/labels/frame_0.txt")).unwrap();
        assert_eq!(kept, "0 0.5 0.5 0.2 0.2\n");
    }

    #[test]
    fn test_unwritable_destination_is_an_io_error() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let blocker = output.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        let image = write_png(input.path(), "a.png", 10, 10);
        let session = completed_session(vec![image], vec![vec![]]);

        let result = export_session(&session, &blocker.join("out"), &ExportOptions::default());
        assert!(matches!(result, Err(Error::Io { .. })));
    }

    #[test]
    fn test_zero_image_size_is_rejected_before_writing() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let image = write_png(input.path(), "a.png", 10, 10);
        let session = completed_session(vec![image], vec![vec![]]);
        let options = ExportOptions {
            image_size: Some(0),
            ..ExportOptions::default()
        };

        let result = export_session(&session, output.path(), &options);
        assert!(matches!(result, Err(Error::OutOfRange(_))));
        assert!(!output.path().join("train").exists());
    }

    #[test]
    fn test_invalid_split_is_rejected() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let image = write_png(input.path(), "a.png", 10, 10);
        let session = completed_session(vec![image], vec![vec![]]);
        let options = ExportOptions {
            test_split: 1.5,
            ..ExportOptions::default()
        };
        assert!(matches!(
            export_session(&session, output.path(), &options),
            Err(Error::OutOfRange(_))
        ));
    }
}
