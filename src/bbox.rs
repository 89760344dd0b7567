/// Bounding box geometry
///
/// Boxes arrive in two conventions: normalized YOLO form (center, size as a
/// fraction of the image) from the detector and the export format, and pixel
/// form (top-left corner, size) from manual drawing. Both are kept as given
/// and normalized against the image size when needed.
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Slack allowed when checking that a box lies inside the image.
const BOUNDS_EPSILON: f64 = 1e-6;

/// Normalized box: center and size as fractions of the image size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

/// Pixel box: top-left corner and size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BoxGeometry {
    Normalized(BoundingBox),
    Pixel(PixelRect),
}

/// One labeled box. `score` is set for detector suggestions and empty for
/// boxes drawn by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub class_uid: u32,
    pub geometry: BoxGeometry,
    pub score: Option<f32>,
}

impl BoundingBox {
    pub fn new(x_center: f64, y_center: f64, width: f64, height: f64) -> Self {
        Self {
            x_center,
            y_center,
            width,
            height,
        }
    }

    /// Build from normalized corner coordinates (x1, y1, x2, y2).
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        let (x_min, x_max) = (x1.min(x2), x1.max(x2));
        let (y_min, y_max) = (y1.min(y2), y1.max(y2));
        Self {
            x_center: (x_min + x_max) / 2.0,
            y_center: (y_min + y_max) / 2.0,
            width: x_max - x_min,
            height: y_max - y_min,
        }
    }

    /// Normalized (x1, y1, x2, y2).
    pub fn to_corners(&self) -> (f64, f64, f64, f64) {
        (
            self.x_center - self.width / 2.0,
            self.y_center - self.height / 2.0,
            self.x_center + self.width / 2.0,
            self.y_center + self.height / 2.0,
        )
    }

    /// Intersect with the unit square.
    pub fn clipped(&self) -> Self {
        let (x1, y1, x2, y2) = self.to_corners();
        Self::from_corners(
            x1.clamp(0.0, 1.0),
            y1.clamp(0.0, 1.0),
            x2.clamp(0.0, 1.0),
            y2.clamp(0.0, 1.0),
        )
    }

    pub fn is_finite(&self) -> bool {
        self.x_center.is_finite()
            && self.y_center.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
    }

    /// Check the box invariant: positive size, inside the unit square.
    pub fn validate(&self) -> Result<()> {
        if !self.is_finite() {
            return Err(Error::InvalidBox(format!("non-finite coordinates in {:?}", self)));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(Error::InvalidBox(format!(
                "width and height must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        let (x1, y1, x2, y2) = self.to_corners();
        if x1 < -BOUNDS_EPSILON
            || y1 < -BOUNDS_EPSILON
            || x2 > 1.0 + BOUNDS_EPSILON
            || y2 > 1.0 + BOUNDS_EPSILON
        {
            return Err(Error::InvalidBox(format!(
                "box ({:.4}, {:.4}, {:.4}, {:.4}) lies outside the image",
                x1, y1, x2, y2
            )));
        }
        Ok(())
    }
}

impl PixelRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Build from two pixel corners in any order, as produced by a drag.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x1 - x2).abs(),
            height: (y1 - y2).abs(),
        }
    }

    pub fn normalize(&self, image_width: u32, image_height: u32) -> BoundingBox {
        let w = image_width as f64;
        let h = image_height as f64;
        BoundingBox {
            x_center: (self.x + self.width / 2.0) / w,
            y_center: (self.y + self.height / 2.0) / h,
            width: self.width / w,
            height: self.height / h,
        }
    }
}

impl BoxGeometry {
    /// Normalized form of this geometry for an image of the given size.
    pub fn normalized(&self, image_width: u32, image_height: u32) -> BoundingBox {
        match self {
            BoxGeometry::Normalized(bbox) => *bbox,
            BoxGeometry::Pixel(rect) => rect.normalize(image_width, image_height),
        }
    }

    pub fn validate(&self, image_width: u32, image_height: u32) -> Result<()> {
        if image_width == 0 || image_height == 0 {
            return Err(Error::InvalidBox(format!(
                "image has no area ({}x{})",
                image_width, image_height
            )));
        }
        self.normalized(image_width, image_height).validate()
    }
}

impl From<BoundingBox> for BoxGeometry {
    fn from(bbox: BoundingBox) -> Self {
        BoxGeometry::Normalized(bbox)
    }
}

impl From<PixelRect> for BoxGeometry {
    fn from(rect: PixelRect) -> Self {
        BoxGeometry::Pixel(rect)
    }
}

impl Annotation {
    /// A box drawn by the user.
    pub fn drawn(class_uid: u32, geometry: impl Into<BoxGeometry>) -> Self {
        Self {
            class_uid,
            geometry: geometry.into(),
            score: None,
        }
    }

    /// A box proposed by the detector.
    pub fn suggested(class_uid: u32, bbox: BoundingBox, score: f32) -> Self {
        Self {
            class_uid,
            geometry: BoxGeometry::Normalized(bbox),
            score: Some(score),
        }
    }

    pub fn normalized(&self, image_width: u32, image_height: u32) -> BoundingBox {
        self.geometry.normalized(image_width, image_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_rect_normalizes_to_center_form() {
        let rect = PixelRect::new(40.0, 30.0, 20.0, 40.0);
        let bbox = rect.normalize(100, 100);
        assert_eq!(bbox, BoundingBox::new(0.5, 0.5, 0.2, 0.4));
    }

    #[test]
    fn test_corners_round_trip() {
        let bbox = BoundingBox::from_corners(0.6, 0.8, 0.2, 0.4);
        assert!((bbox.x_center - 0.4).abs() < 1e-12);
        assert!((bbox.y_center - 0.6).abs() < 1e-12);
        let (x1, y1, x2, y2) = bbox.to_corners();
        assert!((x1 - 0.2).abs() < 1e-12 && (y1 - 0.4).abs() < 1e-12);
        assert!((x2 - 0.6).abs() < 1e-12 && (y2 - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_degenerate_and_outside_boxes() {
        assert!(BoundingBox::new(0.5, 0.5, 0.2, 0.4).validate().is_ok());
        assert!(BoundingBox::new(0.5, 0.5, 0.0, 0.4).validate().is_err());
        assert!(BoundingBox::new(0.5, 0.5, 0.2, -0.1).validate().is_err());
        assert!(BoundingBox::new(0.95, 0.5, 0.2, 0.2).validate().is_err());
        assert!(BoundingBox::new(f64::NAN, 0.5, 0.2, 0.2).validate().is_err());

        let outside = BoxGeometry::Pixel(PixelRect::new(90.0, 0.0, 20.0, 10.0));
        assert!(outside.validate(100, 100).is_err());
        let inside = BoxGeometry::Pixel(PixelRect::new(80.0, 0.0, 20.0, 10.0));
        assert!(inside.validate(100, 100).is_ok());
    }

    #[test]
    fn test_clipped_stays_inside_unit_square() {
        let bbox = BoundingBox::new(0.95, 0.05, 0.2, 0.2).clipped();
        assert!(bbox.validate().is_ok());
        let (x1, y1, x2, y2) = bbox.to_corners();
        assert!((x1 - 0.85).abs() < 1e-9);
        assert!(y1.abs() < 1e-9);
        assert!((x2 - 1.0).abs() < 1e-9);
        assert!((y2 - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_pixel_from_drag_corners() {
        let rect = PixelRect::from_corners(50.0, 60.0, 10.0, 20.0);
        assert_eq!(rect, PixelRect::new(10.0, 20.0, 40.0, 40.0));
    }
}
