use std::collections::BTreeMap;

use crate::models::Sex;

/// Metric name of serum creatinine (mg/dL) as used by rule bundles.
pub const CREATININE_METRIC: &str = "Creatinine";
pub const EGFR_METRIC: &str = "eGFR";

/// A named metric computed from other metrics plus demographics.
pub trait Derivation: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when any prerequisite is missing.
    fn derive(&self, metrics: &BTreeMap<String, f64>, age: Option<u32>, sex: Option<Sex>) -> Option<f64>;
}

/// Estimated GFR, CKD-EPI 2021 (race-free), mL/min/1.73m².
pub struct EgfrCkdEpi2021;

impl Derivation for EgfrCkdEpi2021 {
    fn name(&self) -> &'static str {
        EGFR_METRIC
    }

    fn derive(&self, metrics: &BTreeMap<String, f64>, age: Option<u32>, sex: Option<Sex>) -> Option<f64> {
        let scr = *metrics.get(CREATININE_METRIC)?;
        let age = f64::from(age?);
        let (kappa, alpha, sex_factor) = match sex? {
            Sex::Female => (0.7, -0.241, 1.012),
            Sex::Male => (0.9, -0.302, 1.0),
            Sex::Any => return None,
        };
        if !(scr.is_finite() && scr > 0.0) {
            return None;
        }

        let ratio = scr / kappa;
        let egfr = 142.0
            * ratio.min(1.0).powf(alpha)
            * ratio.max(1.0).powf(-1.200)
            * 0.9938_f64.powf(age)
            * sex_factor;
        egfr.is_finite().then_some(egfr)
    }
}

pub struct DerivedMetricCalculator {
    derivations: Vec<Box<dyn Derivation>>,
}

impl Default for DerivedMetricCalculator {
    fn default() -> Self {
        Self::new(vec![Box::new(EgfrCkdEpi2021)])
    }
}

impl DerivedMetricCalculator {
    pub fn new(derivations: Vec<Box<dyn Derivation>>) -> Self {
        Self { derivations }
    }

    /// Derived values keyed by metric name. Measured metrics are never
    /// overwritten by a derivation of the same name.
    pub fn compute_derived(
        &self,
        known: &BTreeMap<String, f64>,
        age: Option<u32>,
        sex: Option<Sex>,
    ) -> BTreeMap<String, f64> {
        self.derivations
            .iter()
            .filter(|d| !known.contains_key(d.name()))
            .filter_map(|d| d.derive(known, age, sex).map(|v| (d.name().to_string(), v)))
            .collect()
    }
}
