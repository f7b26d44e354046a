//! Loading of tab-delimited feature tables.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use metcore::data::feature::{Feature, FeatureTable};

use crate::error::{AlignError, Result};

const REQUIRED: [&str; 3] = ["mz", "RT", "intensity"];

/// Header lookup with "/" removed from the names (`m/z` -> `mz`).
struct Columns {
    positions: HashMap<String, usize>,
}

impl Columns {
    fn new(headers: &StringRecord) -> Self {
        let positions = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().replace('/', ""), i))
            .collect();
        Columns { positions }
    }

    fn get(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }
}

struct RowParser<'a> {
    path: &'a Path,
    row: usize,
    record: &'a StringRecord,
}

impl RowParser<'_> {
    fn field(&self, column: &str, pos: usize) -> Result<f64> {
        let raw = self.record.get(pos).unwrap_or("").trim();
        raw.parse::<f64>().map_err(|_| AlignError::Field {
            path: self.path.to_path_buf(),
            row: self.row,
            column: column.to_string(),
            message: format!("'{}' is not a number", raw),
        })
    }

    fn optional(&self, column: &str, pos: Option<usize>, default: f64) -> Result<f64> {
        match pos {
            Some(p) => self.field(column, p),
            None => Ok(default),
        }
    }
}

/// Read a feature file; the run is named after the file stem.
pub fn read_feature_file(path: impl AsRef<Path>) -> Result<FeatureTable> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| AlignError::Io { path: path.to_path_buf(), source })?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let table = parse_feature_table(file, name, path)?;
    log::info!("Loaded {} features from {}", table.len(), path.display());
    Ok(table)
}

/// Parse a tab-delimited feature table. `path` is only used in error messages.
pub fn parse_feature_table<R: Read>(reader: R, name: impl Into<String>, path: &Path) -> Result<FeatureTable> {
    let csv_error = |source: csv::Error| AlignError::Csv { path: path.to_path_buf(), source };

    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(reader);
    let columns = Columns::new(reader.headers().map_err(csv_error)?);

    let missing = |column: &str| AlignError::Field {
        path: path.to_path_buf(),
        row: 0,
        column: column.to_string(),
        message: "required column is missing".to_string(),
    };
    let mut required = [0usize; 3];
    for (slot, column) in required.iter_mut().zip(REQUIRED) {
        *slot = columns.get(column).ok_or_else(|| missing(column))?;
    }
    let [mz_col, rt_col, intensity_col] = required;
    let z_col = columns.get("z").or_else(|| columns.get("charge")).ok_or_else(|| missing("z"))?;

    let index_col = columns.get("index");
    let ms1_col = columns.get("MS1ScanNumber");
    let min_ms1_col = columns.get("minMS1ScanNumber");
    let max_ms1_col = columns.get("maxMS1ScanNumber");
    let min_rt_col = columns.get("minRT");
    let max_rt_col = columns.get("maxRT");
    let sn_col = columns.get("SN");
    let tf_col = columns.get("PercentageTF");

    let mut features = Vec::new();
    for (ordinal, record) in reader.records().enumerate() {
        let record = record.map_err(csv_error)?;
        let row = RowParser { path, row: ordinal + 1, record: &record };

        features.push(Feature {
            index: row.optional("index", index_col, ordinal as f64)? as i64,
            mz: row.field("mz", mz_col)?,
            z: row.field("z", z_col)?.round() as i32,
            ms1_scan: row.optional("MS1ScanNumber", ms1_col, 0.0)?,
            min_ms1_scan: row.optional("minMS1ScanNumber", min_ms1_col, 0.0)?,
            max_ms1_scan: row.optional("maxMS1ScanNumber", max_ms1_col, 0.0)?,
            rt: row.field("RT", rt_col)?,
            min_rt: row.optional("minRT", min_rt_col, 0.0)?,
            max_rt: row.optional("maxRT", max_rt_col, 0.0)?,
            intensity: row.field("intensity", intensity_col)?,
            sn: row.optional("SN", sn_col, 0.0)?,
            percentage_tf: row.optional("PercentageTF", tf_col, 0.0)?,
        });
    }

    Ok(FeatureTable::new(name, features))
}
