use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use metcore::algorithm::loess::LoessParams;
use metcore::calibration::run::CalibrationParams;
use metcore::matching::rescue::{RescueRound, RescueStage, RescueTolerance, ToleranceUnit};
use serde::{Deserialize, Serialize};

use crate::align::reference::ReferenceSelection;
use crate::error::{AlignError, Result};

/// User parameters of a multi-run alignment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlignmentParams {
    /// m/z window of the global calibration, ppm
    pub tol_initial: f64,
    /// tolerance = SD x sd_width
    pub sd_width: f64,
    /// "0" selects the reference automatically, otherwise a run or file name
    pub reference_feature: String,
    /// percentage of runs a feature must be present in to count as fully aligned
    pub pct_full_alignment: f64,
    pub rescue: bool,
    pub rescue_rounds: Vec<RescueRound>,
}

impl Default for AlignmentParams {
    fn default() -> Self {
        AlignmentParams {
            tol_initial: 20.0,
            sd_width: 10.0,
            reference_feature: "0".to_string(),
            pct_full_alignment: 100.0,
            rescue: false,
            rescue_rounds: Vec::new(),
        }
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| AlignError::Param { key: key.to_string(), value: value.to_string() })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AlignError::Param { key: key.to_string(), value: value.to_string() }),
    }
}

fn split_list(value: &str) -> Vec<&str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
}

/// Zip comma-separated unit and value lists into rescue rounds.
pub fn parse_rescue_rounds(
    rt_units: &str,
    rt_values: &str,
    mz_units: &str,
    mz_values: &str,
) -> Result<Vec<RescueRound>> {
    let (rt_u, rt_v, mz_u, mz_v) = (split_list(rt_units), split_list(rt_values), split_list(mz_units), split_list(mz_values));
    let n = rt_u.len();
    if rt_v.len() != n || mz_u.len() != n || mz_v.len() != n {
        return Err(AlignError::Configuration(format!(
            "rescue tolerance lists differ in length: rt units {}, rt values {}, m/z units {}, m/z values {}",
            n,
            rt_v.len(),
            mz_u.len(),
            mz_v.len()
        )));
    }

    let mut rounds = Vec::with_capacity(n);
    for i in 0..n {
        let rt = RescueTolerance::new(ToleranceUnit::from_code(rt_u[i])?, parse_value("rt_tolerance_value", rt_v[i])?);
        let mz = RescueTolerance::new(ToleranceUnit::from_code(mz_u[i])?, parse_value("mz_tolerance_value", mz_v[i])?);
        rounds.push(RescueRound { rt, mz });
    }
    Ok(rounds)
}

impl AlignmentParams {
    /// Build from a key -> value map. Unknown keys are ignored.
    pub fn from_key_values(map: &HashMap<String, String>) -> Result<Self> {
        let mut params = AlignmentParams::default();

        if let Some(v) = map.get("tol_initial") {
            params.tol_initial = parse_value("tol_initial", v)?;
        }
        if let Some(v) = map.get("sd_width") {
            params.sd_width = parse_value("sd_width", v)?;
        }
        if let Some(v) = map.get("reference_feature") {
            params.reference_feature = v.trim().to_string();
        }
        if let Some(v) = map.get("pct_full_alignment") {
            params.pct_full_alignment = parse_value("pct_full_alignment", v)?;
        }
        if let Some(v) = map.get("rescue") {
            params.rescue = parse_bool("rescue", v)?;
        }

        let list = |key: &str| map.get(key).map(String::as_str).unwrap_or("");
        params.rescue_rounds = parse_rescue_rounds(
            list("rt_tolerance_unit"),
            list("rt_tolerance_value"),
            list("mz_tolerance_unit"),
            list("mz_tolerance_value"),
        )?;

        params.validate()?;
        Ok(params)
    }

    /// Parse `key = value` lines; text after `#` is a comment.
    pub fn parse(text: &str) -> Result<Self> {
        let map: HashMap<String, String> = text
            .lines()
            .map(|line| line.split('#').next().unwrap_or("").trim())
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        Self::from_key_values(&map)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| AlignError::Io { path: path.to_path_buf(), source })?;
        Self::parse(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.tol_initial > 0.0) {
            return Err(AlignError::Configuration(format!("tol_initial must be positive, got {}", self.tol_initial)));
        }
        if !(self.sd_width > 0.0) {
            return Err(AlignError::Configuration(format!("sd_width must be positive, got {}", self.sd_width)));
        }
        if !(0.0..=100.0).contains(&self.pct_full_alignment) {
            return Err(AlignError::Configuration(format!(
                "pct_full_alignment must be within 0..=100, got {}",
                self.pct_full_alignment
            )));
        }
        if self.rescue && self.rescue_rounds.is_empty() {
            return Err(AlignError::Configuration("rescue is enabled but no rescue tolerances are given".to_string()));
        }
        Ok(())
    }

    pub fn reference_selection(&self) -> ReferenceSelection {
        ReferenceSelection::parse(&self.reference_feature)
    }

    pub fn calibration_params(&self) -> CalibrationParams {
        CalibrationParams {
            tol_initial: self.tol_initial,
            sd_width: self.sd_width,
            loess: LoessParams::default(),
            ..Default::default()
        }
    }

    pub fn rescue_stage(&self) -> Option<RescueStage> {
        if self.rescue {
            Some(RescueStage::new(self.rescue_rounds.clone()))
        } else {
            None
        }
    }
}
