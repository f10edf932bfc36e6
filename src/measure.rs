//! Local accumulation of measures before they are reported.

use std::collections::BTreeMap;

use crate::error::MeasureError;

/// A measure value together with its dynamic measure values.
///
/// Only one dynamic dimension is supported per measure, e.g. "Node", which can hold one
/// value per occurrence (per node name).
///
/// The adjustment factor is a constant multiplier applied to the base value and to every
/// dynamic value whenever they are read. Writes always store unscaled values, so changing
/// the factor rescales everything that was written before.
#[derive(Debug, Clone, PartialEq)]
pub struct Measure {
    /// Unscaled base value.
    value: f64,
    /// Multiplier applied on read.
    adjustment_factor: f64,
    /// Name of the dynamic dimension, required for dynamic values.
    dynamic_name: Option<String>,
    /// Unscaled dynamic values.
    dynamic_values: BTreeMap<String, f64>,
}

impl Default for Measure {
    fn default() -> Self {
        Self {
            value: 0.0,
            adjustment_factor: 1.0,
            dynamic_name: None,
            dynamic_values: BTreeMap::new(),
        }
    }
}

impl Measure {
    /// A measure with value zero and no dynamic dimension.
    pub fn new() -> Self {
        Self::default()
    }

    /// A measure with the given initial value and no dynamic dimension.
    pub fn with_value(value: f64) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    /// A measure with value zero which accepts dynamic values for the given dimension.
    pub fn dynamic(name: impl Into<String>) -> Self {
        Self::dynamic_with_value(name, 0.0)
    }

    /// A measure with the given initial value which accepts dynamic values for the given dimension.
    pub fn dynamic_with_value(name: impl Into<String>, value: f64) -> Self {
        Self {
            value,
            dynamic_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Set the multiplier applied to every value on read.
    pub fn set_adjustment_factor(&mut self, factor: f64) {
        self.adjustment_factor = factor;
    }

    /// Replace the unscaled base value.
    pub fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    /// Add to the unscaled base value.
    pub fn add_value(&mut self, value: f64) {
        self.value += value;
    }

    /// Add one to the unscaled base value.
    pub fn increment(&mut self) {
        self.value += 1.0;
    }

    /// The base value, scaled by the adjustment factor.
    pub fn value(&self) -> f64 {
        self.value * self.adjustment_factor
    }

    /// Name of the dynamic dimension, if any.
    pub fn dynamic_name(&self) -> Option<&str> {
        self.dynamic_name.as_deref()
    }

    /// Add a value for the given key of the dynamic dimension.
    /// Values for the same key are summed up.
    pub fn add_dynamic_value(&mut self, key: &str, value: f64) -> Result<(), MeasureError> {
        if key.is_empty() {
            return Err(MeasureError::MissingDynamicKey);
        }
        if self.dynamic_name.is_none() {
            return Err(MeasureError::MissingDynamicName);
        }

        *self.dynamic_values.entry(key.to_owned()).or_insert(0.0) += value;

        Ok(())
    }

    /// A copy of all dynamic values, each scaled by the adjustment factor.
    pub fn dynamic_values(&self) -> BTreeMap<String, f64> {
        self.dynamic_values
            .iter()
            .map(|(key, value)| (key.clone(), value * self.adjustment_factor))
            .collect()
    }
}
