use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use log::{debug, info, warn, error};

use crate::config::{
    DEFAULT_CLASSES, DEFAULT_MIN_SCORE, DEFAULT_OUTPUT_DIR, DEFAULT_SEED, DEFAULT_TEST_SPLIT,
};
use crate::error::{Error, Result};

/// User-specific settings that persist across annotation sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Class names used when none are given on the command line
    #[serde(default = "default_classes")]
    pub classes: Vec<String>,

    /// Suggestions scoring below this are not shown
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Fraction of exported images placed in the test split
    #[serde(default = "default_test_split")]
    pub test_split: f32,

    /// Seed for the train/test shuffle
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Resize exported images to a square JPEG of this size (null = copy as is)
    #[serde(default)]
    pub export_image_size: Option<u32>,

    /// Export only images marked ready
    #[serde(default)]
    pub only_ready: bool,

    /// Where the dataset is written when no output directory is given
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Show a progress bar while exporting
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

fn default_classes() -> Vec<String> {
    DEFAULT_CLASSES.iter().map(|s| s.to_string()).collect()
}

fn default_min_score() -> f32 {
    DEFAULT_MIN_SCORE
}

fn default_test_split() -> f32 {
    DEFAULT_TEST_SPLIT
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_output_dir() -> String {
    DEFAULT_OUTPUT_DIR.to_string()
}

fn default_show_progress() -> bool {
    true
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            classes: default_classes(),
            min_score: DEFAULT_MIN_SCORE,
            test_split: DEFAULT_TEST_SPLIT,
            seed: DEFAULT_SEED,
            export_image_size: None,
            only_ready: false,
            output_dir: default_output_dir(),
            show_progress: true,
        }
    }
}

impl UserSettings {
    /// Get the path to the settings file
    /// On macOS: ~/Library/Application Support/LabelSkater/settings.yaml
    /// On Linux: ~/.config/LabelSkater/settings.yaml
    /// On Windows: C:\Users\<user>\AppData\Roaming\LabelSkater\settings.yaml
    pub fn settings_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."));

        let app_config_dir = config_dir.join("LabelSkater");
        app_config_dir.join("settings.yaml")
    }

    /// The custom settings path when one is given, the default one otherwise
    pub fn resolve_path(custom_path: Option<&str>) -> PathBuf {
        match custom_path {
            Some(p) => PathBuf::from(p),
            None => Self::settings_path(),
        }
    }

    /// Load settings from the YAML file
    /// If custom_path is provided, uses that path; otherwise uses the default settings path.
    /// Falls back to defaults when the file is missing or broken.
    pub fn load(custom_path: Option<&str>) -> Self {
        if let Some(p) = custom_path {
            info!("Using custom settings path: {}", p);
        }
        let path = Self::resolve_path(custom_path);

        if !path.exists() {
            info!("Settings file not found at {:?}, using defaults", path);
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                error!("{}", e);
                warn!("Using default settings");
                Self::default()
            }
        }
    }

    /// Load settings from an existing file, reporting read and parse errors.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let settings = serde_yaml::from_str::<UserSettings>(&contents)
            .map_err(|e| {
                Error::Settings(format!("failed to parse settings file at {:?}: {}", path, e))
            })?;

        info!("Loaded settings from {:?}", path);
        debug!(
            "Settings: classes={:?}, min_score={}, test_split={}, seed={}, export_image_size={:?}",
            settings.classes,
            settings.min_score,
            settings.test_split,
            settings.seed,
            settings.export_image_size
        );
        Ok(settings)
    }

    /// Save settings to a YAML file while preserving comments
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }

        // If file exists, try to preserve comments by doing in-place value updates
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(contents) => {
                    let updated = self.update_yaml_values(&contents);
                    fs::write(path, updated).map_err(|e| Error::io(path, e))?;
                    info!("Saved settings to {:?} (comments preserved)", path);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to read existing settings file for comment preservation: {}", e);
                    // Fall through to create new file
                }
            }
        }

        let yaml = self.to_yaml_with_comments();
        fs::write(path, yaml).map_err(|e| Error::io(path, e))?;

        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Update YAML values while preserving existing comments and structure
    fn update_yaml_values(&self, yaml_content: &str) -> String {
        let mut result = yaml_content.to_string();

        result = Self::replace_yaml_value(&result, "classes", &self.classes_flow());
        result = Self::replace_yaml_value(&result, "min_score", &self.min_score.to_string());
        result = Self::replace_yaml_value(&result, "test_split", &self.test_split.to_string());
        result = Self::replace_yaml_value(&result, "seed", &self.seed.to_string());
        result = Self::replace_yaml_value(&result, "export_image_size", &self.image_size_value());
        result = Self::replace_yaml_value(&result, "only_ready", &self.only_ready.to_string());
        result = Self::replace_yaml_value(&result, "output_dir", &yaml_string(&self.output_dir));
        let show_progress = self.show_progress.to_string();
        result = Self::replace_yaml_value(&result, "show_progress", &show_progress);

        result
    }

    /// Replace a YAML key's value while preserving the rest of the line
    fn replace_yaml_value(yaml: &str, key: &str, new_value: &str) -> String {
        let pattern = format!(r"(?m)^(\s*{}\s*:\s*).*$", regex::escape(key));
        let replacement = format!("${{1}}{}", new_value.replace('$', "$$"));

        match regex::Regex::new(&pattern) {
            Ok(re) => re.replace_all(yaml, replacement.as_str()).to_string(),
            Err(e) => {
                warn!("Failed to create regex for key '{}': {}", key, e);
                yaml.to_string()
            }
        }
    }

    /// Class names as a single-line YAML flow sequence
    fn classes_flow(&self) -> String {
        let quoted: Vec<String> = self.classes.iter().map(|name| yaml_string(name)).collect();
        format!("[{}]", quoted.join(", "))
    }

    fn image_size_value(&self) -> String {
        match self.export_image_size {
            Some(size) => size.to_string(),
            None => "null".to_string(),
        }
    }

    /// Generate YAML content with comments for new files
    fn to_yaml_with_comments(&self) -> String {
        format!(
            r#"# LabelSkater User Settings
# This file is loaded automatically when the application starts.
# Command line options override the values here.

# Object classes, in YOLO class index order. The first one is the default class.
classes: {}

# Detector suggestions scoring below this value are not shown
min_score: {}

# Fraction of images exported to the test split (0.0 = everything goes to train)
test_split: {}

# Seed for the train/test shuffle
seed: {}

# Resize exported images to a square JPEG of this size, e.g. 640
# - null: copy the original files unchanged
export_image_size: {}

# Export only the images marked ready
only_ready: {}

# Output directory used when none is given on the command line
output_dir: {}

# Show a progress bar while exporting
show_progress: {}
"#,
            self.classes_flow(),
            self.min_score,
            self.test_split,
            self.seed,
            self.image_size_value(),
            self.only_ready,
            yaml_string(&self.output_dir),
            self.show_progress
        )
    }
}

/// A string as a single-line double-quoted YAML scalar. JSON string escapes
/// are a subset of YAML's and never span lines, so the line-based value
/// replacement above keeps working. Characters YAML refuses to read even
/// inside quotes (DEL, C1 controls, BOM) are escaped as well.
fn yaml_string(value: &str) -> String {
    let quoted = serde_json::to_string(value).unwrap_or_else(|e| {
        warn!("Failed to quote settings value {:?}: {}", value, e);
        "\"\"".to_string()
    });
    quoted
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '\u{feff}' | '\u{fffe}' | '\u{ffff}') {
                format!("\\u{:04x}", c as u32)
            } else {
                c.to_string()
            }
        })
        .collect()
}
