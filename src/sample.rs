// src/sample.rs
//! Result records
//!
//! A `Sample` is an open-keyed record; a `ResultSeries` is the append-only list the
//! runner builds, numbering each sample as it is appended.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{NstatError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sample(BTreeMap<String, Value>);

impl Sample {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    /// Copy every entry of `other` in, overwriting existing keys.
    pub fn extend<I: IntoIterator<Item = (String, Value)>>(&mut self, other: I) {
        self.0.extend(other);
    }

    /// Copy the fields of a JSON object in; non-objects are ignored.
    pub fn merge_object(&mut self, obj: &Value) {
        if let Some(map) = obj.as_object() {
            self.0.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Append-only list of samples with a monotonic `global_sample_id`
#[derive(Debug, Default)]
pub struct ResultSeries {
    samples: Vec<Sample>,
    next_id: u64,
}

impl ResultSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp `global_sample_id` and append; returns the id.
    pub fn push(&mut self, mut sample: Sample) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        sample.insert("global_sample_id", id);
        self.samples.push(sample);
        id
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Write the series as a pretty JSON array.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| NstatError::io(format!("creating {}", parent.display()), e))?;
        }
        let json = serde_json::to_string_pretty(&self.samples)?;
        fs::write(path, json).map_err(|e| NstatError::io(format!("writing {}", path.display()), e))?;
        info!("Wrote {} samples to {}", self.samples.len(), path.display());
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Vec<Sample>> {
        let text = fs::read_to_string(path)
            .map_err(|e| NstatError::io(format!("reading {}", path.display()), e))?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_are_monotonic() {
        let mut series = ResultSeries::new();
        for i in 0..3 {
            let mut s = Sample::new();
            s.insert("throughput_responses_sec", 1000.0 * i as f64);
            assert_eq!(series.push(s), i);
        }
        let ids: Vec<i64> = series.samples().iter().filter_map(|s| s.get_i64("global_sample_id")).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_write_json_keeps_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/results.json");
        let mut series = ResultSeries::new();
        let mut s = Sample::new();
        s.insert("bootup_time_secs", -1.0);
        s.insert("discovered_switches", -1);
        s.merge_object(&json!({"add_flows_time": 2.5}));
        series.push(s);
        series.write_json(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("-1.0"));
        let back = ResultSeries::read_json(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].get_i64("discovered_switches"), Some(-1));
        assert_eq!(back[0].get_f64("add_flows_time"), Some(2.5));
    }
}
