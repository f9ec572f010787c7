use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Axis-aligned box in source-image pixels.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

/// Rectangular occupancy grid, row-major.
///
/// The segmentation service picks the grid resolution; it is independent of
/// both the source image and the canvas, so consumers always rescale.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(try_from = "Vec<Vec<Cell>>", into = "Vec<Vec<u8>>")]
pub struct MaskGrid {
    rows: usize,
    cols: usize,
    cells: Vec<bool>,
}

/// A grid cell as the backend sends it: `0`/`1` or a boolean.
#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(untagged)]
pub enum Cell {
    Flag(bool),
    Number(f64),
}

impl From<Cell> for bool {
    fn from(cell: Cell) -> Self {
        match cell {
            Cell::Flag(flag) => flag,
            Cell::Number(n) => n != 0.0,
        }
    }
}

impl MaskGrid {
    pub fn from_rows<R, C>(rows: R) -> Result<Self, Error>
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator<Item = bool>,
    {
        let mut cells = Vec::new();
        let mut cols = None;
        let mut count = 0;
        for row in rows {
            let before = cells.len();
            cells.extend(row);
            let len = cells.len() - before;
            match cols {
                None => cols = Some(len),
                Some(expected) if expected != len => {
                    return Err(Error::MaskGrid(format!(
                        "row {} has {} cells, expected {}",
                        count, len, expected
                    )));
                }
                Some(_) => {}
            }
            count += 1;
        }
        Ok(Self {
            rows: count,
            cols: cols.unwrap_or(0),
            cells,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// No rows or no columns: nothing to draw or hit.
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols && self.cells[row * self.cols + col]
    }

    /// Occupied cells as `(row, col)`, row-major.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let cols = self.cols;
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, set)| **set)
            .map(move |(i, _)| (i / cols, i % cols))
    }
}

impl TryFrom<Vec<Vec<Cell>>> for MaskGrid {
    type Error = Error;

    fn try_from(rows: Vec<Vec<Cell>>) -> Result<Self, Self::Error> {
        MaskGrid::from_rows(
            rows.into_iter()
                .map(|row| row.into_iter().map(bool::from).collect::<Vec<_>>()),
        )
    }
}

impl From<MaskGrid> for Vec<Vec<u8>> {
    fn from(grid: MaskGrid) -> Self {
        if grid.cols == 0 {
            return vec![Vec::new(); grid.rows];
        }
        grid.cells
            .chunks(grid.cols)
            .map(|row| row.iter().map(|set| u8::from(*set)).collect())
            .collect()
    }
}

/// A detected object as returned by `/segment`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Mask {
    pub id: String,
    #[serde(flatten)]
    pub bbox: BoundingBox,
    #[serde(rename = "score", default)]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "mask", default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<MaskGrid>,
}

impl Mask {
    /// The grid, if it has any cells to draw or hit.
    pub fn drawable_grid(&self) -> Option<&MaskGrid> {
        self.grid.as_ref().filter(|grid| !grid.is_empty())
    }
}
