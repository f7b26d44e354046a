pub mod error;

// data module
pub mod data {
    pub mod feature;
    pub mod tolerance;
}

// algorithm module
pub mod algorithm {
    pub mod utility;
    pub mod loess;
}

// calibration module
pub mod calibration {
    pub mod global;
    pub mod local;
    pub mod run;
}

// matching module
pub mod matching {
    pub mod index;
    pub mod matcher;
    pub mod rescue;
}

pub use error::{CalibrationError, Result};
