use std::str::FromStr;

use crate::segment::MaskGrid;

/// Pixel size of the drawing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    /// Fixed width, height following the image's aspect ratio.
    pub fn fit(image_width: u32, image_height: u32, canvas_width: u32) -> Self {
        let height = if image_width == 0 {
            1
        } else {
            (u64::from(canvas_width) * u64::from(image_height) / u64::from(image_width)) as u32
        };
        Self {
            width: canvas_width,
            height: height.max(1),
        }
    }

    /// Canvas pixels per grid cell, `(scale_x, scale_y)`.
    pub fn scale(&self, grid: &MaskGrid) -> (f64, f64) {
        (
            f64::from(self.width) / grid.cols() as f64,
            f64::from(self.height) / grid.rows() as f64,
        )
    }

    pub fn contains(&self, point: CanvasPoint) -> bool {
        point.x >= 0.0
            && point.y >= 0.0
            && point.x < f64::from(self.width)
            && point.y < f64::from(self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasPoint {
    pub x: f64,
    pub y: f64,
}

impl CanvasPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Centre of the pixel at `(px, py)`.
    pub fn pixel_center(px: u32, py: u32) -> Self {
        Self::new(f64::from(px) + 0.5, f64::from(py) + 0.5)
    }
}

/// Parses `X,Y`; both coordinates must be finite.
impl FromStr for CanvasPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| format!("expected X,Y, got `{}`", s))?;
        let parse = |v: &str| {
            let v = v.trim();
            match v.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(n),
                Ok(_) => Err(format!("coordinate `{}` is not finite", v)),
                Err(e) => Err(format!("invalid coordinate `{}`: {}", v, e)),
            }
        };
        Ok(Self::new(parse(x)?, parse(y)?))
    }
}

/// On-screen placement of the canvas, which may be scaled by layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl ElementRect {
    /// Element drawn at its natural pixel size at the origin.
    pub fn unscaled(canvas: CanvasSize) -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            width: f64::from(canvas.width),
            height: f64::from(canvas.height),
        }
    }

    pub fn to_canvas(&self, client_x: f64, client_y: f64, canvas: CanvasSize) -> Option<CanvasPoint> {
        if self.width <= 0.0 || self.height <= 0.0 {
            return None;
        }
        Some(CanvasPoint {
            x: (client_x - self.left) * f64::from(canvas.width) / self.width,
            y: (client_y - self.top) * f64::from(canvas.height) / self.height,
        })
    }
}
