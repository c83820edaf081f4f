use std::collections::HashMap;

use thiserror::Error;

use crate::models::LabTest;

/// Why a value could not be brought into its canonical unit.
/// The value is always passed through unchanged when this is raised.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionFailed {
    #[error("Test {code} has no conversion procedure")]
    NoProcedure { code: String },

    #[error("Unknown conversion procedure: {0}")]
    UnknownProcedure(String),

    #[error("Unit {unit} is not convertible for test {code}")]
    UnsupportedUnit { code: String, unit: String },

    #[error("Conversion produced a non-finite value from {value}")]
    NonFinite { value: f64 },
}

impl ConversionFailed {
    /// Stable machine-readable name, used in payloads and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoProcedure { .. } => "no_procedure",
            Self::UnknownProcedure(_) => "unknown_procedure",
            Self::UnsupportedUnit { .. } => "unsupported_unit",
            Self::NonFinite { .. } => "non_finite",
        }
    }
}

/// A statically compiled conversion, referenced from the catalog by `id`.
#[derive(Debug, Clone, Copy)]
pub struct ConversionProcedure {
    pub id: &'static str,
    pub from_unit: &'static str,
    pub to_unit: &'static str,
    pub apply: fn(f64) -> f64,
}

const BUILTIN_PROCEDURES: &[ConversionProcedure] = &[
    ConversionProcedure {
        id: "creatinine_umol_l_to_mg_dl",
        from_unit: "umol/L",
        to_unit: "mg/dL",
        apply: |v| v / 88.42,
    },
    ConversionProcedure {
        id: "glucose_mmol_l_to_mg_dl",
        from_unit: "mmol/L",
        to_unit: "mg/dL",
        apply: |v| v * 18.016,
    },
    ConversionProcedure {
        id: "ldl_mmol_l_to_mg_dl",
        from_unit: "mmol/L",
        to_unit: "mg/dL",
        apply: |v| v * 38.67,
    },
    ConversionProcedure {
        id: "triglycerides_mmol_l_to_mg_dl",
        from_unit: "mmol/L",
        to_unit: "mg/dL",
        apply: |v| v * 88.57,
    },
    ConversionProcedure {
        id: "hemoglobin_g_l_to_g_dl",
        from_unit: "g/L",
        to_unit: "g/dL",
        apply: |v| v / 10.0,
    },
];

/// Outcome of a conversion attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Converted {
    pub value: f64,
    pub unit: String,
    pub failure: Option<ConversionFailed>,
}

impl Converted {
    fn unchanged(value: f64, unit: &str, failure: Option<ConversionFailed>) -> Self {
        Self {
            value,
            unit: unit.to_string(),
            failure,
        }
    }
}

/// Registry-backed converter. Never fails past its boundary: every problem
/// is reported through `Converted::failure` with the input passed through.
pub struct UnitConverter {
    procedures: HashMap<&'static str, ConversionProcedure>,
}

impl Default for UnitConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitConverter {
    pub fn new() -> Self {
        let mut converter = Self {
            procedures: HashMap::new(),
        };
        for procedure in BUILTIN_PROCEDURES {
            converter.register(*procedure);
        }
        converter
    }

    pub fn register(&mut self, procedure: ConversionProcedure) {
        self.procedures.insert(procedure.id, procedure);
    }

    pub fn procedure(&self, id: &str) -> Option<&ConversionProcedure> {
        self.procedures.get(id)
    }

    pub fn convert(&self, test: &LabTest, value: f64, from_unit: &str) -> Converted {
        if test.is_canonical_unit(from_unit) {
            return Converted::unchanged(value, from_unit, None);
        }

        let failure = if !test.is_alt_unit(from_unit) {
            ConversionFailed::UnsupportedUnit {
                code: test.code.clone(),
                unit: from_unit.to_string(),
            }
        } else {
            match test.conversion.as_deref() {
                None => ConversionFailed::NoProcedure {
                    code: test.code.clone(),
                },
                Some(id) => match self.procedures.get(id) {
                    None => ConversionFailed::UnknownProcedure(id.to_string()),
                    Some(procedure) if !procedure.from_unit.eq_ignore_ascii_case(from_unit.trim()) => {
                        ConversionFailed::UnsupportedUnit {
                            code: test.code.clone(),
                            unit: from_unit.to_string(),
                        }
                    }
                    Some(procedure) => {
                        let converted = (procedure.apply)(value);
                        if converted.is_finite() {
                            return Converted {
                                value: converted,
                                unit: test.canonical_unit.clone(),
                                failure: None,
                            };
                        }
                        ConversionFailed::NonFinite { value }
                    }
                },
            }
        };

        tracing::warn!(code = %test.code, unit = from_unit, reason = %failure, "Conversion failed, passing value through");
        Converted::unchanged(value, from_unit, Some(failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TestStatus;
    use chrono::Utc;

    fn creatinine() -> LabTest {
        LabTest {
            id: 1,
            code: "2160-0".into(),
            internal_code: None,
            name: "Creatinine".into(),
            aliases: vec![],
            specimen: Some("serum".into()),
            canonical_unit: "mg/dL".into(),
            alt_units: vec!["umol/L".into(), "mmol/L".into()],
            conversion: Some("creatinine_umol_l_to_mg_dl".into()),
            fhir_code: None,
            panel: vec![],
            status: TestStatus::Active,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn canonical_unit_is_unchanged() {
        let out = UnitConverter::new().convert(&creatinine(), 1.1, "mg/dL");
        assert_eq!(out, Converted::unchanged(1.1, "mg/dL", None));
    }

    #[test]
    fn alternate_unit_is_converted() {
        let out = UnitConverter::new().convert(&creatinine(), 132.63, "umol/L");
        assert!(out.failure.is_none());
        assert_eq!(out.unit, "mg/dL");
        assert!((out.value - 1.5).abs() < 1e-3);
    }

    #[test]
    fn missing_procedure_passes_through() {
        let test = LabTest { conversion: None, ..creatinine() };
        let out = UnitConverter::new().convert(&test, 132.0, "umol/L");
        assert_eq!(out.value, 132.0);
        assert_eq!(out.unit, "umol/L");
        assert_eq!(out.failure.unwrap().kind(), "no_procedure");
    }

    #[test]
    fn unknown_procedure_is_reported() {
        let test = LabTest { conversion: Some("eval(x * 2)".into()), ..creatinine() };
        let out = UnitConverter::new().convert(&test, 132.0, "umol/L");
        assert!(matches!(out.failure, Some(ConversionFailed::UnknownProcedure(_))));
    }

    #[test]
    fn procedure_rejects_unexpected_source_unit() {
        let out = UnitConverter::new().convert(&creatinine(), 0.13, "mmol/L");
        assert_eq!(out.value, 0.13);
        assert!(matches!(out.failure, Some(ConversionFailed::UnsupportedUnit { .. })));
    }

    #[test]
    fn unlisted_unit_is_unsupported() {
        let out = UnitConverter::new().convert(&creatinine(), 1.0, "mg/L");
        assert!(matches!(out.failure, Some(ConversionFailed::UnsupportedUnit { .. })));
    }

    #[test]
    fn non_finite_result_is_reported() {
        let mut converter = UnitConverter::new();
        converter.register(ConversionProcedure {
            id: "creatinine_umol_l_to_mg_dl",
            from_unit: "umol/L",
            to_unit: "mg/dL",
            apply: |v| v / 0.0,
        });
        let out = converter.convert(&creatinine(), 1.0, "umol/L");
        assert_eq!(out.failure, Some(ConversionFailed::NonFinite { value: 1.0 }));
    }

    #[test]
    fn builtins_are_registered() {
        let converter = UnitConverter::new();
        for id in [
            "creatinine_umol_l_to_mg_dl",
            "glucose_mmol_l_to_mg_dl",
            "ldl_mmol_l_to_mg_dl",
            "triglycerides_mmol_l_to_mg_dl",
            "hemoglobin_g_l_to_g_dl",
        ] {
            assert!(converter.procedure(id).is_some(), "{id}");
        }
        let hgb = converter.procedure("hemoglobin_g_l_to_g_dl").unwrap();
        assert_eq!((hgb.apply)(135.0), 13.5);
    }
}
