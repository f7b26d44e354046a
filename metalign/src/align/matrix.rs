use metcore::matching::matcher::MatchOutcome;
use serde::{Deserialize, Serialize};

/// Row-major map from reference features to matched storage positions of every run.
///
/// Row `r` belongs to reference feature `r`; the reference column holds the identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignmentMatrix {
    n_rows: usize,
    n_runs: usize,
    ref_col: usize,
    cells: Vec<Option<usize>>,
}

impl AlignmentMatrix {
    pub fn new(n_rows: usize, n_runs: usize, ref_col: usize) -> Self {
        assert!(ref_col < n_runs, "reference column {} out of range for {} runs", ref_col, n_runs);
        let mut cells = vec![None; n_rows * n_runs];
        for r in 0..n_rows {
            cells[r * n_runs + ref_col] = Some(r);
        }
        AlignmentMatrix { n_rows, n_runs, ref_col, cells }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_runs(&self) -> usize {
        self.n_runs
    }

    pub fn ref_col(&self) -> usize {
        self.ref_col
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<usize> {
        self.cells[row * self.n_runs + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, pos: usize) {
        debug_assert!(col != self.ref_col);
        self.cells[row * self.n_runs + col] = Some(pos);
    }

    pub fn row(&self, row: usize) -> &[Option<usize>] {
        &self.cells[row * self.n_runs..(row + 1) * self.n_runs]
    }

    /// Write the pairs of one comparison run into column `col`.
    pub fn fill_column(&mut self, col: usize, outcome: &MatchOutcome) {
        for p in &outcome.pairs {
            self.set(p.ref_pos, col, p.comp_pos);
        }
    }

    /// Number of non-reference columns filled in `row`.
    pub fn matched_in_row(&self, row: usize) -> usize {
        self.row(row)
            .iter()
            .enumerate()
            .filter(|&(c, v)| c != self.ref_col && v.is_some())
            .count()
    }

    /// Storage positions of column `col` that appear in any row.
    pub fn used_positions(&self, col: usize, n_features: usize) -> Vec<bool> {
        let mut used = vec![false; n_features];
        for r in 0..self.n_rows {
            if let Some(p) = self.get(r, col) {
                used[p] = true;
            }
        }
        used
    }

    /// Matrix with `-1` for unmatched cells.
    pub fn to_sentinel(&self) -> Vec<Vec<i64>> {
        (0..self.n_rows)
            .map(|r| self.row(r).iter().map(|v| v.map_or(-1, |p| p as i64)).collect())
            .collect()
    }
}
