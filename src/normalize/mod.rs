//! Measurement normalization: unit conversion into a test's canonical unit
//! and metrics derived from other normalized values.

pub mod derived;
pub mod units;

pub use derived::{Derivation, DerivedMetricCalculator, EgfrCkdEpi2021};
pub use units::{ConversionFailed, ConversionProcedure, Converted, UnitConverter};
