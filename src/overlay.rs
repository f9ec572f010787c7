use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use image::{imageops::FilterType, DynamicImage, Rgba, RgbaImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, Blend},
    rect::Rect,
};

use crate::{
    canvas::CanvasSize,
    error::Result,
    segment::{Mask, MaskGrid},
};

pub const PALETTE: [[u8; 3]; 6] = [
    [255, 99, 132],
    [54, 162, 235],
    [255, 206, 86],
    [75, 192, 192],
    [153, 102, 255],
    [255, 159, 64],
];

pub const OPACITY: f32 = 0.45;

/// Overlay color for the mask at `index` in list order.
pub fn mask_color(index: usize) -> Rgba<u8> {
    let [r, g, b] = PALETTE[index % PALETTE.len()];
    Rgba([r, g, b, (OPACITY * 255.0).round() as u8])
}

/// One occupied grid cell in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CellRect {
    /// Pixels whose centres fall inside the rectangle.
    fn pixels(&self) -> Option<Rect> {
        let x0 = (self.x - 0.5).ceil().max(0.0);
        let y0 = (self.y - 0.5).ceil().max(0.0);
        let x1 = (self.x + self.width - 0.5).ceil();
        let y1 = (self.y + self.height - 0.5).ceil();
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::at(x0 as i32, y0 as i32).of_size((x1 - x0) as u32, (y1 - y0) as u32))
    }
}

pub fn cell_rects(grid: &MaskGrid, canvas: CanvasSize) -> Vec<CellRect> {
    if grid.is_empty() {
        return Vec::new();
    }
    let (scale_x, scale_y) = canvas.scale(grid);
    grid.occupied()
        .map(|(row, col)| CellRect {
            x: col as f64 * scale_x,
            y: row as f64 * scale_y,
            width: scale_x,
            height: scale_y,
        })
        .collect()
}

/// Largest relative difference between cell width and height still drawn as square.
pub const ASPECT_TOLERANCE: f64 = 0.05;

/// True when the grid's cells would be visibly non-square on this canvas.
pub fn aspect_mismatch(grid: &MaskGrid, canvas: CanvasSize) -> bool {
    if grid.is_empty() || canvas.width == 0 || canvas.height == 0 {
        return false;
    }
    let (scale_x, scale_y) = canvas.scale(grid);
    (scale_x / scale_y - 1.0).abs() > ASPECT_TOLERANCE
}

/// Resize `image` onto a canvas `canvas_width` pixels wide and overlay `masks`.
pub fn render(image: &DynamicImage, masks: &[Mask], canvas_width: u32) -> RgbaImage {
    let canvas = CanvasSize::fit(image.width(), image.height(), canvas_width);
    let base = image
        .resize_exact(canvas.width, canvas.height, FilterType::Triangle)
        .to_rgba8();
    draw_masks(base, masks)
}

/// Overlay `masks` on an already-sized canvas.
///
/// Masks are painted back to front, so the first mask in the list ends up on
/// top. `hit_test` scans in list order and therefore agrees with what is
/// visible where masks overlap.
pub fn draw_masks(base: RgbaImage, masks: &[Mask]) -> RgbaImage {
    let canvas = CanvasSize {
        width: base.width(),
        height: base.height(),
    };
    let mut target = Blend(base);
    for (index, mask) in masks.iter().enumerate().rev() {
        let Some(grid) = mask.drawable_grid() else {
            continue;
        };
        let color = mask_color(index);
        for cell in cell_rects(grid, canvas) {
            if let Some(pixels) = cell.pixels() {
                draw_filled_rect_mut(&mut target, pixels, color);
            }
        }
    }
    target.0
}

/// Write a rendered canvas; the format follows the file extension.
///
/// The canvas is opaque, so it is stored as RGB, which every supported
/// encoder (JPEG included) accepts.
pub fn save(canvas: &RgbaImage, path: &Path) -> Result<()> {
    DynamicImage::ImageRgba8(canvas.clone()).to_rgb8().save(path)?;
    Ok(())
}

/// `<dir>/<stem>.png`, keeping any dots inside the stem.
pub fn png_path(dir: &Path, stem: &OsStr) -> PathBuf {
    dir.join(format!("{}.png", stem.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::BoundingBox;

    fn mask(id: &str, rows: &[&[u8]]) -> Mask {
        Mask {
            id: id.to_string(),
            bbox: BoundingBox {
                x: 10,
                y: 10,
                width: 50,
                height: 50,
            },
            confidence: 0.9,
            label: None,
            grid: Some(
                MaskGrid::from_rows(rows.iter().map(|row| row.iter().map(|v| *v != 0))).unwrap(),
            ),
        }
    }

    fn gray(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([128, 128, 128, 255]))
    }

    #[test]
    fn palette_cycles_with_fixed_alpha() {
        assert_eq!(mask_color(0), Rgba([255, 99, 132, 115]));
        assert_eq!(mask_color(6), mask_color(0));
        assert_eq!(mask_color(7), Rgba([54, 162, 235, 115]));
    }

    #[test]
    fn one_rect_per_occupied_cell() {
        let grid = mask("m", &[&[0, 1], &[1, 0]]).grid.unwrap();
        let canvas = CanvasSize {
            width: 600,
            height: 600,
        };
        assert_eq!(
            cell_rects(&grid, canvas),
            vec![
                CellRect {
                    x: 300.0,
                    y: 0.0,
                    width: 300.0,
                    height: 300.0
                },
                CellRect {
                    x: 0.0,
                    y: 300.0,
                    width: 300.0,
                    height: 300.0
                },
            ]
        );
    }

    #[test]
    fn paints_only_occupied_quadrants() {
        let out = draw_masks(gray(600, 600), &[mask("m", &[&[0, 1], &[1, 0]])]);
        let base = Rgba([128, 128, 128, 255]);

        assert_eq!(*out.get_pixel(100, 100), base);
        assert_eq!(*out.get_pixel(500, 500), base);

        let tinted = *out.get_pixel(450, 150);
        assert_ne!(tinted, base);
        assert_eq!(tinted, *out.get_pixel(150, 450));
        assert_eq!(tinted, *out.get_pixel(300, 0));
        assert_eq!(*out.get_pixel(299, 0), base);
        // 45% of 255 over 128 lands in between
        assert!(tinted[0] > 128 && tinted[0] < 255);
        assert_eq!(tinted[3], 255);
    }

    #[test]
    fn first_mask_is_painted_on_top() {
        let masks = [mask("first", &[&[1]]), mask("second", &[&[1]])];
        let out = draw_masks(gray(10, 10), &masks);

        let mut expected = Rgba([128, 128, 128, 255]);
        image::Pixel::blend(&mut expected, &mask_color(1));
        image::Pixel::blend(&mut expected, &mask_color(0));
        assert_eq!(*out.get_pixel(5, 5), expected);
    }

    #[test]
    fn skips_masks_without_grid() {
        let mut empty = mask("none", &[&[1]]);
        empty.grid = None;
        let out = draw_masks(gray(4, 4), &[empty]);
        assert_eq!(out, gray(4, 4));
    }

    #[test]
    fn render_resizes_to_canvas_width() {
        let image = DynamicImage::ImageRgba8(gray(300, 150));
        let out = render(&image, &[], 600);
        assert_eq!(out.dimensions(), (600, 300));
    }

    #[test]
    fn mismatched_grid_stretches_over_canvas() {
        // 2x2 grid over a 2:1 canvas: flagged, and cells become 2:1 rectangles
        let grid = mask("m", &[&[1, 0], &[0, 0]]).grid.unwrap();
        let canvas = CanvasSize {
            width: 600,
            height: 300,
        };
        assert!(aspect_mismatch(&grid, canvas));
        let rects = cell_rects(&grid, canvas);
        assert_eq!(rects[0].width, 300.0);
        assert_eq!(rects[0].height, 150.0);

        let square = CanvasSize {
            width: 600,
            height: 600,
        };
        assert!(!aspect_mismatch(&grid, square));
    }

    #[test]
    fn near_square_cells_are_not_flagged() {
        let grid = MaskGrid::from_rows(vec![vec![false; 100]; 100]).unwrap();
        let canvas = CanvasSize {
            width: 600,
            height: 599,
        };
        assert!(!aspect_mismatch(&grid, canvas));

        // a 256x85 grid for a 1000x333 photo
        let grid = MaskGrid::from_rows(vec![vec![false; 256]; 85]).unwrap();
        assert!(!aspect_mismatch(&grid, CanvasSize::fit(1000, 333, 600)));

        let tall = MaskGrid::from_rows(vec![vec![false; 100]; 150]).unwrap();
        assert!(aspect_mismatch(&tall, canvas));
    }

    #[test]
    fn saves_opaque_canvas_as_jpeg_and_png() {
        let dir = tempfile::tempdir().unwrap();
        let canvas = draw_masks(gray(8, 6), &[mask("m", &[&[1, 0], &[0, 1]])]);

        for name in ["out.jpg", "out.png", "out.bmp"] {
            let path = dir.path().join(name);
            save(&canvas, &path).unwrap();
            let reopened = image::open(&path).unwrap();
            assert_eq!((reopened.width(), reopened.height()), (8, 6));
        }
    }

    #[test]
    fn png_path_keeps_dotted_stems() {
        let dir = Path::new("renders");
        assert_eq!(
            png_path(dir, OsStr::new("room.v1")),
            Path::new("renders/room.v1.png")
        );
        assert_ne!(png_path(dir, OsStr::new("room.v1")), png_path(dir, OsStr::new("room.v2")));
    }
}
