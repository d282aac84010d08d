// src/sweep.rs
//! Cartesian sweep over dimension vectors
//!
//! Axes are iterated outermost first: the last axis varies fastest, and every
//! vector is walked in the order it was written in the config.

use serde_json::Value;

use crate::config::{Dimensions, TestType};
use crate::error::{NstatError, Result};
use crate::sample::Sample;

#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub name: String,
    pub values: Vec<Value>,
}

/// One concrete assignment of a value to every axis
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SweepPoint {
    pub values: Vec<(String, Value)>,
}

impl SweepPoint {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(Value::as_u64)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// `get_u64` that fails with a config error for a missing dimension.
    pub fn require_u64(&self, name: &str) -> Result<u64> {
        self.get_u64(name)
            .ok_or_else(|| NstatError::Config(format!("sweep point has no dimension '{}'", name)))
    }

    pub fn annotate(&self, sample: &mut Sample) {
        for (name, value) in &self.values {
            sample.insert(name, value.clone());
        }
    }
}

impl std::fmt::Display for SweepPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.values.iter().map(|(n, v)| format!("{}={}", n, v)).collect();
        f.write_str(&parts.join(", "))
    }
}

/// All points of the product of `axes`; any empty axis yields no points.
pub fn cartesian(axes: &[Axis]) -> Vec<SweepPoint> {
    let mut points = vec![SweepPoint::default()];
    for axis in axes {
        let mut next = Vec::with_capacity(points.len() * axis.values.len());
        for point in &points {
            for value in &axis.values {
                let mut p = point.clone();
                p.values.push((axis.name.clone(), value.clone()));
                next.push(p);
            }
        }
        points = next;
    }
    points
}

/// Values of a named dimension vector.
pub fn dimension_values(dims: &Dimensions, name: &str) -> Result<Vec<Value>> {
    let doc = serde_json::to_value(dims)?;
    doc.get(name)
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| NstatError::Config(format!("unknown dimension '{}'", name)))
}

/// Axes swept by `test_type`; the statistics period joins as the innermost axis when set.
pub fn axes_for(test_type: TestType, dims: &Dimensions) -> Result<Vec<Axis>> {
    let mut axes = Vec::new();
    for name in test_type.required_dimensions() {
        axes.push(Axis {
            name: name.to_string(),
            values: dimension_values(dims, name)?,
        });
    }
    if !dims.controller_statistics_period_ms.is_empty() {
        axes.push(Axis {
            name: "controller_statistics_period_ms".to_string(),
            values: dimension_values(dims, "controller_statistics_period_ms")?,
        });
    }
    Ok(axes)
}
