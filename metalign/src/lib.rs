// src/lib.rs
pub mod error;
pub mod params;
pub mod io;

pub mod align {
    pub mod reference;
    pub mod matrix;
    pub mod result;
    pub mod aligner;
}

pub use align::aligner::MultiRunAligner;
pub use error::AlignError;
