use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

#[allow(unused_imports)]
use log::{debug, info, warn, error};

use crate::error::{Error, Result};

/// Extensions picked up by the directory scan (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff", "webp"];

/// An image on disk together with its pixel dimensions.
///
/// Identity is the path; the dimensions are read once when the reference is
/// created and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    path: PathBuf,
    name: String,
    width: u32,
    height: u32,
}

impl ImageRef {
    /// Read the dimensions of the image at `path` without decoding the pixels.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let (width, height) = image::image_dimensions(path).map_err(|e| Error::image(path, e))?;
        Ok(Self::new(path, width, height))
    }

    /// Build a reference with known dimensions.
    pub fn new(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        let path = path.into();
        let name = get_filename(&path).unwrap_or_else(|| path.to_string_lossy().to_string());
        Self {
            path,
            name,
            width,
            height,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

pub fn get_filename(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|os_str| os_str.to_str())
        .map(|s| s.to_string())
}

pub fn is_file(path: &Path) -> bool {
    fs::metadata(path).map(|metadata| metadata.is_file()).unwrap_or(false)
}

pub fn is_directory(path: &Path) -> bool {
    fs::metadata(path).map(|metadata| metadata.is_dir()).unwrap_or(false)
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// List the images directly inside `directory_path`, in natural order.
pub fn get_image_paths(directory_path: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(directory_path).map_err(|e| Error::io(directory_path, e))?;

    let mut image_paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| is_file(path) && has_image_extension(path))
        .collect();

    // Sort paths like Nautilus file viewer. `image_paths.sort()` does not work as expected
    alphanumeric_sort::sort_path_slice(&mut image_paths);
    Ok(image_paths)
}

/// Read dimensions for every path, skipping images that cannot be read.
pub fn load_image_refs(paths: &[PathBuf]) -> Vec<ImageRef> {
    // par_iter keeps the input order on collect
    paths
        .par_iter()
        .filter_map(|path| match ImageRef::open(path) {
            Ok(image) => Some(image),
            Err(e) => {
                warn!("Skipping unreadable image: {}", e);
                None
            }
        })
        .collect()
}

/// Result of a directory scan. Files with an image extension whose
/// dimensions could not be read end up in `skipped`.
#[derive(Debug, Clone, Default)]
pub struct DirectoryScan {
    pub images: Vec<ImageRef>,
    pub skipped: Vec<PathBuf>,
}

/// Scan a single directory for annotatable images.
pub fn scan_directory(directory_path: &Path) -> Result<DirectoryScan> {
    if !is_directory(directory_path) {
        return Err(Error::io(
            directory_path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ));
    }
    let paths = get_image_paths(directory_path)?;
    debug!("Found {} candidate image files in {}", paths.len(), directory_path.display());

    let images = load_image_refs(&paths);
    info!(
        "Loaded {} of {} images from {}",
        images.len(),
        paths.len(),
        directory_path.display()
    );

    let loaded: HashSet<&Path> = images.iter().map(|image| image.path()).collect();
    let skipped: Vec<PathBuf> = paths
        .iter()
        .filter(|path| !loaded.contains(path.as_path()))
        .cloned()
        .collect();
    Ok(DirectoryScan { images, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn write_image(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(width, height, Rgb([10, 20, 30]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        path
    }

    #[test]
    fn test_get_image_paths_filters_and_sorts_naturally() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "img10.png", 4, 4);
        write_image(dir.path(), "img2.png", 4, 4);
        write_image(dir.path(), "IMG1.JPG", 4, 4);
        fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        fs::create_dir(dir.path().join("nested.png")).unwrap();

        let names: Vec<String> = get_image_paths(dir.path())
            .unwrap()
            .iter()
            .filter_map(|p| get_filename(p))
            .collect();
        assert_eq!(names, vec!["IMG1.JPG", "img2.png", "img10.png"]);
    }

    #[test]
    fn test_scan_directory_reads_dimensions_and_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "a.png", 32, 16);
        fs::write(dir.path().join("b.png"), b"definitely not a png").unwrap();

        let scan = scan_directory(dir.path()).unwrap();
        assert_eq!(scan.skipped, vec![dir.path().join("b.png")]);
        let images = scan.images;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name(), "a.png");
        assert_eq!(images[0].dimensions(), (32, 16));
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(get_image_paths(&missing), Err(Error::Io { .. })));
    }

    #[test]
    fn test_scanning_a_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_image(dir.path(), "a.png", 4, 4);
        assert!(is_directory(dir.path()));
        assert!(!is_directory(&file));
        assert!(matches!(scan_directory(&file), Err(Error::Io { .. })));
    }
}
