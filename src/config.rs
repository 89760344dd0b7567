use std::path::PathBuf;

use once_cell::sync::Lazy;
use crate::settings::UserSettings;

// Default values for configuration
// These serve as fallback values for settings missing from the YAML file
pub const DEFAULT_CLASSES: &[&str] = &["object"];
pub const DEFAULT_MIN_SCORE: f32 = 0.25;
pub const DEFAULT_TEST_SPLIT: f32 = 0.0;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_OUTPUT_DIR: &str = "yolo_dataset";
pub const DEFAULT_MOCK_INPUT_SIZE: u32 = 640;    // Mock detector box coordinate space

pub struct Config {
    pub classes: Vec<String>,               // Class names when none are given on the command line
    pub min_score: f32,                     // Suggestion confidence threshold
    pub test_split: f32,                    // Fraction of exported images in the test split
    pub seed: u64,                          // Train/test shuffle seed
    pub export_image_size: Option<u32>,     // Square JPEG export size, None copies files
    pub only_ready: bool,                   // Export only images marked ready
    pub output_dir: PathBuf,                // Default dataset output directory
    pub show_progress: bool,                // Progress bar during export
}

impl Config {
    pub fn from_settings(settings: &UserSettings) -> Self {
        Config {
            classes: settings.classes.clone(),
            min_score: settings.min_score,
            test_split: settings.test_split,
            seed: settings.seed,
            export_image_size: settings.export_image_size,
            only_ready: settings.only_ready,
            output_dir: PathBuf::from(&settings.output_dir),
            show_progress: settings.show_progress,
        }
    }
}

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    // Load settings from YAML file
    let settings = UserSettings::load(None);
    Config::from_settings(&settings)
});
