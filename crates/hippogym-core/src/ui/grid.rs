use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Element, apply_patch};
use crate::error::{HippoError, Result};
use crate::message::ElementCategory;

/// Largest accepted row or column count.
pub const MAX_GRID_DIM: usize = 256;

/// Clickable grid of cells. Client clicks arrive as
/// `{"Grid": {"row": r, "col": c}}` and toggle selection of that cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grid {
    rows: usize,
    cols: usize,
    cells: Vec<Vec<Value>>,
    selected: Option<(usize, usize)>,
}

#[derive(Debug, Default, Deserialize)]
struct GridPatch {
    rows: Option<usize>,
    cols: Option<usize>,
    cells: Option<Vec<Vec<Value>>>,
    row: Option<usize>,
    col: Option<usize>,
}

/// The only thing a client may send: a cell click.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct GridClick {
    row: Option<usize>,
    col: Option<usize>,
}

impl Default for Grid {
    fn default() -> Self {
        Self::new(3, 3)
    }
}

impl Grid {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![vec![Value::Null; cols]; rows],
            selected: None,
        }
    }

    pub fn selected(&self) -> Option<(usize, usize)> {
        self.selected
    }

    /// Toggle selection of `(row, col)`. Out-of-range cells are ignored.
    fn click(&mut self, row: usize, col: usize) -> bool {
        if row >= self.rows || col >= self.cols {
            return false;
        }
        self.selected = if self.selected == Some((row, col)) {
            None
        } else {
            Some((row, col))
        };
        true
    }

    fn resize(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.cells.resize_with(rows, Vec::new);
        for row in &mut self.cells {
            row.resize(cols, Value::Null);
        }
        if matches!(self.selected, Some((r, c)) if r >= rows || c >= cols) {
            self.selected = None;
        }
    }
}

impl Element for Grid {
    fn category(&self) -> ElementCategory {
        ElementCategory::Grid
    }

    fn update(&mut self, patch: &Value) -> Result<bool> {
        let p: GridPatch = apply_patch(patch)?;
        check_dims(p.rows.unwrap_or(self.rows), p.cols.unwrap_or(self.cols))?;
        if let Some(cells) = &p.cells {
            check_dims(cells.len(), cells.iter().map(Vec::len).max().unwrap_or(0))?;
        }
        let mut changed = false;
        if p.rows.is_some() || p.cols.is_some() {
            self.resize(p.rows.unwrap_or(self.rows), p.cols.unwrap_or(self.cols));
            changed = true;
        }
        if let Some(cells) = p.cells {
            let rows = cells.len();
            let cols = cells.iter().map(Vec::len).max().unwrap_or(0);
            self.cells = cells;
            self.resize(rows, cols);
            changed = true;
        }
        if let (Some(row), Some(col)) = (p.row, p.col) {
            changed |= self.click(row, col);
        }
        Ok(changed)
    }

    fn input(&mut self, event: &Value) -> Result<bool> {
        let click: GridClick = apply_patch(event)?;
        match (click.row, click.col) {
            (Some(row), Some(col)) => Ok(self.click(row, col)),
            _ => Ok(false),
        }
    }

    fn state(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn reset(&mut self) {
        self.selected = None;
    }
}

fn check_dims(rows: usize, cols: usize) -> Result<()> {
    if rows > MAX_GRID_DIM || cols > MAX_GRID_DIM {
        return Err(HippoError::InvalidArgument(format!(
            "grid of {rows}x{cols} exceeds {MAX_GRID_DIM}x{MAX_GRID_DIM}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn click_toggles_selection() {
        let mut grid = Grid::default();
        assert!(grid.update(&json!({"row": 1, "col": 2})).unwrap());
        assert_eq!(grid.selected(), Some((1, 2)));
        grid.update(&json!({"row": 1, "col": 2})).unwrap();
        assert_eq!(grid.selected(), None);
    }

    #[test]
    fn out_of_range_click_is_ignored() {
        let mut grid = Grid::new(2, 2);
        assert!(!grid.update(&json!({"row": 5, "col": 0})).unwrap());
        assert_eq!(grid.selected(), None);
    }

    #[test]
    fn shrinking_drops_stale_selection() {
        let mut grid = Grid::new(4, 4);
        grid.update(&json!({"row": 3, "col": 3})).unwrap();
        grid.update(&json!({"rows": 2})).unwrap();
        assert_eq!(grid.selected(), None);
        let state = grid.state().unwrap();
        assert_eq!(state["cells"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn client_input_is_limited_to_clicks() {
        let mut grid = Grid::new(2, 2);
        assert!(grid.input(&json!({"row": 0, "col": 1})).unwrap());
        assert_eq!(grid.selected(), Some((0, 1)));

        let huge = json!({"rows": 1, "cols": 1u64 << 40});
        assert!(matches!(grid.input(&huge), Err(HippoError::InvalidArgument(_))));
        assert!(grid.input(&json!({"cells": [[1]]})).is_err());
        assert_eq!(grid.state().unwrap()["cols"], 2);
        assert_eq!(grid.selected(), Some((0, 1)));
    }

    #[test]
    fn oversized_update_is_rejected_before_allocating() {
        let mut grid = Grid::new(2, 2);
        let err = grid.update(&json!({"rows": 1, "cols": 1u64 << 40})).unwrap_err();
        assert!(matches!(err, HippoError::InvalidArgument(_)));
        assert!(grid.update(&json!({"rows": MAX_GRID_DIM + 1})).is_err());
        assert_eq!(grid.state().unwrap()["rows"], 2);

        assert!(grid.update(&json!({"rows": MAX_GRID_DIM, "cols": 1})).unwrap());
        assert_eq!(grid.state().unwrap()["rows"], MAX_GRID_DIM);
    }
}
