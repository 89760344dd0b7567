//! Bounding-box annotation with detector suggestions and YOLO export
//!
//! Images from one directory are walked in order by an
//! [`AnnotationSession`]. A [`DetectionModel`] proposes boxes for each image,
//! the annotator accepts, draws or deletes boxes, and once every image has
//! been processed the finalized set is written as a YOLO dataset.

pub mod bbox;
pub mod build_info;
pub mod classes;
pub mod coco_parser;
pub mod config;
pub mod controller;
pub mod error;
pub mod export;
pub mod file_io;
pub mod logging;
pub mod oracle;
pub mod session;
pub mod settings;

// Re-export commonly used types and functions
pub use bbox::{Annotation, BoundingBox, BoxGeometry, PixelRect};
pub use classes::{ClassInfo, ClassStore};
pub use controller::{Command, Controller, Outcome};
pub use error::{Error, Result};
pub use export::{export, export_session, ExportOptions, ExportSummary};
pub use file_io::{scan_directory, DirectoryScan, ImageRef};
pub use oracle::{suggest, CocoResultsModel, Detection, DetectionModel, MockModel};
pub use session::{AnnotationSession, AnnotationSet, SessionState};
pub use settings::UserSettings;
