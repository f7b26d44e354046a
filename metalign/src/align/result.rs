use metcore::data::feature::{FeatureTable, FEATURE_COLUMNS};
use serde::{Deserialize, Serialize};

use crate::align::matrix::AlignmentMatrix;

/// Features of every run side by side, one row per aligned reference feature.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignedTable {
    /// `{run}_{column}` for every run and feature column
    pub header: Vec<String>,
    pub rows: Vec<Vec<Option<f64>>>,
}

impl AlignedTable {
    fn header(runs: &[FeatureTable]) -> Vec<String> {
        runs.iter()
            .flat_map(|run| FEATURE_COLUMNS.iter().map(move |c| format!("{}_{}", run.name, c)))
            .collect()
    }

    fn from_rows(runs: &[FeatureTable], matrix: &AlignmentMatrix, rows: &[usize]) -> Self {
        let rows = rows
            .iter()
            .map(|&r| {
                matrix
                    .row(r)
                    .iter()
                    .zip(runs)
                    .flat_map(|(cell, run)| match cell {
                        Some(pos) => run.get(*pos).values().map(Some),
                        None => [None; FEATURE_COLUMNS.len()],
                    })
                    .collect()
            })
            .collect();
        AlignedTable { header: Self::header(runs), rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Values of a column by header name.
    pub fn column_values(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let c = self.column(name)?;
        Some(self.rows.iter().map(|row| row[c]).collect())
    }
}

/// Per-run counts of the classified features.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAlignmentCounts {
    pub name: String,
    pub n_features: usize,
    pub full: usize,
    pub partial: usize,
    pub unaligned: usize,
}

/// Fully aligned, partially aligned and unaligned features of all runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub full: AlignedTable,
    pub partial: AlignedTable,
    /// per run in input order; features that ended in no aligned row
    pub unaligned: Vec<FeatureTable>,
    pub counts: Vec<RunAlignmentCounts>,
}

impl AlignmentResult {
    /// Classify the rows of `matrix`.
    ///
    /// A row is full when every comparison run holds a match and partial when some but
    /// not all do. With `pct_full_alignment < 100`, any other row present in at least
    /// `ceil(pct / 100 * n_runs)` runs, reference included, is promoted to full; this
    /// covers reference-only rows as well.
    pub fn from_matrix(runs: &[FeatureTable], matrix: &AlignmentMatrix, pct_full_alignment: f64) -> Self {
        let n_runs = matrix.n_runs();
        let n_comp = n_runs - 1;
        let ref_col = matrix.ref_col();

        let mut full_rows = Vec::new();
        let mut partial_rows = Vec::new();
        let mut lonely_rows = Vec::new();
        for r in 0..matrix.n_rows() {
            match matrix.matched_in_row(r) {
                m if m == n_comp => full_rows.push(r),
                0 => lonely_rows.push(r),
                _ => partial_rows.push(r),
            }
        }

        if pct_full_alignment < 100.0 && full_rows.len() < matrix.n_rows() {
            let required = (pct_full_alignment / 100.0 * n_runs as f64).ceil() as usize;
            let covered = |r: &usize| matrix.matched_in_row(*r) + 1 >= required;
            let (promoted_partial, partial): (Vec<usize>, Vec<usize>) = partial_rows.into_iter().partition(covered);
            let (promoted_lonely, lonely): (Vec<usize>, Vec<usize>) = lonely_rows.into_iter().partition(covered);
            log::info!(
                "{} more features are present in at least {} of {} runs and count as fully aligned",
                promoted_partial.len() + promoted_lonely.len(),
                required,
                n_runs
            );
            full_rows.extend(promoted_partial);
            full_rows.extend(promoted_lonely);
            full_rows.sort_unstable();
            partial_rows = partial;
            lonely_rows = lonely;
        }

        let unaligned: Vec<FeatureTable> = runs
            .iter()
            .enumerate()
            .map(|(c, run)| {
                let features = if c == ref_col {
                    lonely_rows.iter().map(|&r| run.get(r).clone()).collect()
                } else {
                    let used = matrix.used_positions(c, run.len());
                    run.iter().zip(used).filter(|(_, u)| !u).map(|(f, _)| f.clone()).collect()
                };
                FeatureTable::new(run.name.clone(), features)
            })
            .collect();

        let present = |rows: &[usize], c: usize| rows.iter().filter(|&&r| matrix.get(r, c).is_some()).count();
        let counts: Vec<RunAlignmentCounts> = runs
            .iter()
            .enumerate()
            .map(|(c, run)| RunAlignmentCounts {
                name: run.name.clone(),
                n_features: run.len(),
                full: present(&full_rows, c),
                partial: present(&partial_rows, c),
                unaligned: unaligned[c].len(),
            })
            .collect();

        log::info!("{:<24}{:>12}{:>18}{:>20}{:>12}", "Run", "Features", "Fully aligned", "Partially aligned", "Unaligned");
        for s in &counts {
            log::info!("{:<24}{:>12}{:>18}{:>20}{:>12}", s.name, s.n_features, s.full, s.partial, s.unaligned);
        }

        AlignmentResult {
            full: AlignedTable::from_rows(runs, matrix, &full_rows),
            partial: AlignedTable::from_rows(runs, matrix, &partial_rows),
            unaligned,
            counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metcore::data::feature::Feature;
    use metcore::matching::matcher::MatchOutcome;

    fn runs(n_runs: usize, n: usize) -> Vec<FeatureTable> {
        (0..n_runs)
            .map(|k| {
                let features = (0..n).map(|i| Feature::new(i as i64, 100.0 + i as f64, 10.0 * k as f64, 1, 1.0)).collect();
                FeatureTable::new(format!("run{}", k), features)
            })
            .collect()
    }

    fn outcome(n: usize, pairs: &[(usize, usize)]) -> MatchOutcome {
        let mut o = MatchOutcome::empty(n, n);
        for &(r, c) in pairs {
            o.push(r, c);
        }
        o
    }

    #[test]
    fn test_partition_of_reference_rows() {
        let runs = runs(3, 4);
        let mut m = AlignmentMatrix::new(4, 3, 0);
        m.fill_column(1, &outcome(4, &[(0, 0), (1, 1), (2, 2)]));
        m.fill_column(2, &outcome(4, &[(0, 1), (1, 3)]));
        let res = AlignmentResult::from_matrix(&runs, &m, 100.0);

        assert_eq!(res.full.len(), 2);
        assert_eq!(res.partial.len(), 1);
        assert_eq!(res.unaligned[0].len(), 1);
        assert_eq!(res.unaligned[0].get(0).index, 3);
        assert_eq!(res.full.len() + res.partial.len() + res.unaligned[0].len(), 4);
        // run1 position 3 and run2 positions 0 and 2 were never matched
        assert_eq!(res.unaligned[1].len(), 1);
        assert_eq!(res.unaligned[2].len(), 2);

        assert_eq!(res.counts[1], RunAlignmentCounts { name: "run1".into(), n_features: 4, full: 2, partial: 1, unaligned: 1 });
        assert_eq!(res.counts[2].partial, 0);
    }

    #[test]
    fn test_aligned_table_layout() {
        let runs = runs(2, 2);
        let mut m = AlignmentMatrix::new(2, 2, 1);
        m.fill_column(0, &outcome(2, &[(1, 0)]));
        let res = AlignmentResult::from_matrix(&runs, &m, 100.0);

        assert_eq!(res.full.header.len(), 24);
        assert_eq!(res.full.header[0], "run0_index");
        assert_eq!(res.full.header[13], "run1_mz");
        assert_eq!(res.full.len(), 1);
        assert_eq!(res.full.column_values("run0_RT").unwrap(), vec![Some(0.0)]);
        assert_eq!(res.full.column_values("run1_RT").unwrap(), vec![Some(10.0)]);
        assert_eq!(res.full.column_values("run0_mz").unwrap(), vec![Some(100.0)]);
        assert_eq!(res.full.column_values("run1_mz").unwrap(), vec![Some(101.0)]);
    }

    #[test]
    fn test_full_percentage_keeps_partial_rows() {
        let runs = runs(3, 3);
        let mut m = AlignmentMatrix::new(3, 3, 0);
        m.fill_column(1, &outcome(3, &[(0, 0), (1, 1)]));
        m.fill_column(2, &outcome(3, &[(0, 0)]));
        let res = AlignmentResult::from_matrix(&runs, &m, 100.0);
        assert_eq!(res.full.len(), 1);
        assert_eq!(res.partial.len(), 1);
    }

    #[test]
    fn test_partial_rows_are_promoted() {
        let runs = runs(3, 3);
        let mut m = AlignmentMatrix::new(3, 3, 0);
        m.fill_column(1, &outcome(3, &[(0, 0), (1, 1)]));
        m.fill_column(2, &outcome(3, &[(0, 0)]));
        // ceil(0.5 * 3) = 2 runs, the partial row is present in ref and run1
        let res = AlignmentResult::from_matrix(&runs, &m, 50.0);
        assert_eq!(res.full.len(), 2);
        assert!(res.partial.is_empty());
        assert_eq!(res.full.column_values("run2_index").unwrap(), vec![Some(0.0), None]);
    }

    #[test]
    fn test_two_runs_half_coverage_promotes_every_reference_row() {
        let runs = runs(2, 3);
        let mut m = AlignmentMatrix::new(3, 2, 0);
        m.fill_column(1, &outcome(3, &[(1, 2)]));

        let strict = AlignmentResult::from_matrix(&runs, &m, 100.0);
        assert_eq!(strict.full.len(), 1);
        assert_eq!(strict.unaligned[0].len(), 2);

        // ceil(0.5 * 2) = 1 run, so reference-only rows qualify
        let res = AlignmentResult::from_matrix(&runs, &m, 50.0);
        assert_eq!(res.full.len(), 3);
        assert!(res.partial.is_empty());
        assert!(res.unaligned[0].is_empty());
        assert_eq!(res.unaligned[1].len(), 2);
        assert_eq!(res.full.column_values("run1_index").unwrap(), vec![None, Some(2.0), None]);
        assert_eq!(res.counts[0].full, 3);
        assert_eq!(res.counts[1].full, 1);
    }

    #[test]
    fn test_single_run_is_fully_aligned() {
        let runs = runs(1, 5);
        let m = AlignmentMatrix::new(5, 1, 0);
        let res = AlignmentResult::from_matrix(&runs, &m, 100.0);
        assert_eq!(res.full.len(), 5);
        assert!(res.partial.is_empty());
        assert!(res.unaligned[0].is_empty());
    }
}
