use std::cmp::Reverse;
use std::fmt::{self, Display, Formatter};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Column names of a feature row, in the order returned by [`Feature::values`].
pub const FEATURE_COLUMNS: [&str; 12] = [
    "index",
    "mz",
    "z",
    "MS1ScanNumber",
    "minMS1ScanNumber",
    "maxMS1ScanNumber",
    "RT",
    "minRT",
    "maxRT",
    "intensity",
    "SN",
    "PercentageTF",
];

/// A detected chromatographic peak of one run.
///
/// # Description
///
/// `rt` and `mz` are the working coordinates and are the only fields changed by
/// calibration. A charge of `0` means the charge state could not be determined.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub index: i64,
    pub mz: f64,
    pub z: i32,
    pub ms1_scan: f64,
    pub min_ms1_scan: f64,
    pub max_ms1_scan: f64,
    pub rt: f64,
    pub min_rt: f64,
    pub max_rt: f64,
    pub intensity: f64,
    pub sn: f64,
    pub percentage_tf: f64,
}

impl Feature {
    /// Minimal constructor used by tests and synthetic runs; scan and shape fields are zeroed.
    pub fn new(index: i64, mz: f64, rt: f64, z: i32, intensity: f64) -> Self {
        Feature {
            index,
            mz,
            z,
            ms1_scan: 0.0,
            min_ms1_scan: 0.0,
            max_ms1_scan: 0.0,
            rt,
            min_rt: rt,
            max_rt: rt,
            intensity,
            sn: 0.0,
            percentage_tf: 0.0,
        }
    }

    /// Row values in [`FEATURE_COLUMNS`] order.
    pub fn values(&self) -> [f64; 12] {
        [
            self.index as f64,
            self.mz,
            self.z as f64,
            self.ms1_scan,
            self.min_ms1_scan,
            self.max_ms1_scan,
            self.rt,
            self.min_rt,
            self.max_rt,
            self.intensity,
            self.sn,
            self.percentage_tf,
        ]
    }

    /// True if a partner of charge `other` is acceptable under the "0 matches anything" rule.
    #[inline]
    pub fn charge_compatible(&self, other: i32) -> bool {
        self.z == 0 || other == 0 || self.z == other
    }
}

impl Display for Feature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Feature(index: {}, mz: {:.5}, z: {}, rt: {:.3}, intensity: {:.1})",
            self.index, self.mz, self.z, self.rt, self.intensity
        )
    }
}

/// Features of one run.
///
/// Storage order is whatever the feature file provided; matching never relies on it and
/// always goes through [`FeatureTable::intensity_order`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FeatureTable {
    pub name: String,
    pub features: Vec<Feature>,
}

impl FeatureTable {
    pub fn new(name: impl Into<String>, features: Vec<Feature>) -> Self {
        FeatureTable { name: name.into(), features }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    #[inline]
    pub fn get(&self, pos: usize) -> &Feature {
        &self.features[pos]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// Storage positions sorted by descending intensity. Ties keep storage order.
    pub fn intensity_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.features.len()).collect();
        order.sort_by_key(|&i| Reverse(OrderedFloat(self.features[i].intensity)));
        order
    }

    /// Rank of every storage position within [`FeatureTable::intensity_order`] (0 = most intense).
    pub fn intensity_rank(&self) -> Vec<usize> {
        let mut rank = vec![0usize; self.features.len()];
        for (r, pos) in self.intensity_order().into_iter().enumerate() {
            rank[pos] = r;
        }
        rank
    }

    /// Median intensity of the `n` most intense features, `0.0` for an empty table.
    pub fn top_n_median_intensity(&self, n: usize) -> f64 {
        let top: Vec<f64> = self
            .intensity_order()
            .into_iter()
            .take(n)
            .map(|i| self.features[i].intensity)
            .collect();
        if top.is_empty() {
            return 0.0;
        }
        crate::algorithm::utility::median(&top)
    }

    pub fn position_of_index(&self, index: i64) -> Option<usize> {
        self.features.iter().position(|f| f.index == index)
    }

    pub fn rt_values(&self) -> Vec<f64> {
        self.features.iter().map(|f| f.rt).collect()
    }

    pub fn mz_values(&self) -> Vec<f64> {
        self.features.iter().map(|f| f.mz).collect()
    }

    #[inline]
    pub fn set_rt(&mut self, pos: usize, rt: f64) {
        self.features[pos].rt = rt;
    }

    #[inline]
    pub fn set_mz(&mut self, pos: usize, mz: f64) {
        self.features[pos].mz = mz;
    }
}
