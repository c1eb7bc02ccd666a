//! The observation pipeline: per-sample filtering, JSON extraction, ring
//! buffering, and transforms over the buffer.

use std::collections::VecDeque;
use std::rc::Rc;

use sample::{DataType, Sample, Value};

use crate::extraction::{narrow, Extraction};

/// Transform applied over an observation's buffer when emitting a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    None,
    Mean,
    StdDev,
    Min,
    Max,
}

impl Transform {
    /// Map a transform name to its type. Unknown names are `None`.
    pub fn from_name(name: &str) -> Transform {
        match name {
            "mean" => Transform::Mean,
            "stddev" => Transform::StdDev,
            "min" => Transform::Min,
            "max" => Transform::Max,
            _ => Transform::None,
        }
    }
}

/// Mutable state of one Observation resource.
#[derive(Debug, Clone)]
pub struct ObsState {
    min_period: f64,
    change_by: f64,
    low_limit: f64,
    high_limit: f64,
    buffer_max: u32,
    json_extraction: Option<Extraction>,
    transform: Transform,
    backup_period: u32,
    destination: String,
    config_managed: bool,
    relevant: bool,
    last_accepted: Option<Rc<Sample>>,
    last_backup_ts: f64,
    buffer: VecDeque<Rc<Sample>>,
}

impl ObsState {
    pub fn new() -> ObsState {
        ObsState {
            min_period: f64::NAN,
            change_by: f64::NAN,
            low_limit: f64::NAN,
            high_limit: f64::NAN,
            buffer_max: 0,
            json_extraction: None,
            transform: Transform::None,
            backup_period: 0,
            destination: String::new(),
            config_managed: false,
            relevant: false,
            last_accepted: None,
            last_backup_ts: f64::NAN,
            buffer: VecDeque::new(),
        }
    }

    /// Run one sample through the pipeline. Returns the sample to emit
    /// downstream, or `None` when a filter drops it.
    pub fn ingest(&mut self, sample: Rc<Sample>) -> Option<Rc<Sample>> {
        // JSON extraction runs before every other filter. When an
        // extraction is configured, non-JSON samples are dropped whole.
        let sample = match &self.json_extraction {
            Some(extraction) => {
                if sample.data_type() != DataType::Json {
                    tracing::debug!(
                        extraction = extraction.spec(),
                        "dropping non-JSON sample from extracting observation"
                    );
                    return None;
                }
                let node = extraction.query(sample.as_json())?;
                Rc::new(Sample::new(sample.timestamp(), narrow(node)))
            }
            None => sample,
        };

        if self.min_period.is_finite() && self.min_period > 0.0 {
            if let Some(last) = &self.last_accepted {
                if sample.timestamp() - last.timestamp() < self.min_period {
                    return None;
                }
            }
        }

        // The range filter sees numeric values, with booleans as 0/1.
        // Other types skip it.
        if let Some(v) = numeric_view(&sample) {
            if !self.range_accepts(v) {
                return None;
            }
        }

        if self.change_by.is_finite()
            && self.change_by > 0.0
            && sample.data_type() != DataType::Trigger
        {
            if let Some(last) = &self.last_accepted {
                match (numeric_view(&sample), numeric_view(last)) {
                    (Some(v), Some(prev)) => {
                        if (v - prev).abs() < self.change_by {
                            return None;
                        }
                    }
                    // Non-numeric hysteresis: drop only exact repeats.
                    _ => {
                        if sample.value() == last.value() {
                            return None;
                        }
                    }
                }
            }
        }

        if self.buffer_max > 0 {
            self.buffer.push_back(sample.clone());
            while self.buffer.len() > self.buffer_max as usize {
                self.buffer.pop_front();
            }
        }

        let emitted = self.apply_transform(&sample);
        self.last_accepted = Some(sample);
        Some(emitted)
    }

    fn range_accepts(&self, v: f64) -> bool {
        let (lo, hi) = (self.low_limit, self.high_limit);
        if lo.is_nan() && hi.is_nan() {
            true
        } else if lo.is_nan() {
            v <= hi
        } else if hi.is_nan() {
            v >= lo
        } else if hi >= lo {
            // Live band: accept inside the range.
            lo <= v && v <= hi
        } else {
            // Dead band: accept outside (hi, lo).
            v <= hi || v >= lo
        }
    }

    fn apply_transform(&self, accepted: &Rc<Sample>) -> Rc<Sample> {
        if self.transform == Transform::None || self.buffer.is_empty() {
            return accepted.clone();
        }
        let values: Vec<f64> = self.buffer.iter().filter_map(numeric_view_ref).collect();
        if values.is_empty() {
            return accepted.clone();
        }
        let out = match self.transform {
            Transform::None => unreachable!(),
            Transform::Mean => mean(&values),
            Transform::StdDev => {
                let m = mean(&values);
                let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>()
                    / values.len() as f64;
                var.sqrt()
            }
            Transform::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            Transform::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        };
        Rc::new(Sample::new(accepted.timestamp(), Value::Numeric(out)))
    }

    /// True when a buffer backup should run now; updates the throttle clock.
    pub fn backup_due(&mut self, now: f64) -> bool {
        if self.backup_period == 0 || self.buffer_max == 0 {
            return false;
        }
        if self.last_backup_ts.is_nan() || now - self.last_backup_ts >= self.backup_period as f64
        {
            self.last_backup_ts = now;
            true
        } else {
            false
        }
    }

    /// Any setting that differs from a freshly created observation.
    pub fn has_non_default_config(&self) -> bool {
        (self.min_period.is_finite() && self.min_period > 0.0)
            || (self.change_by.is_finite() && self.change_by != 0.0)
            || !self.low_limit.is_nan()
            || !self.high_limit.is_nan()
            || self.buffer_max > 0
            || self.json_extraction.is_some()
            || self.transform != Transform::None
            || self.backup_period > 0
            || !self.destination.is_empty()
    }

    pub fn min_period(&self) -> f64 {
        self.min_period
    }
    pub fn set_min_period(&mut self, seconds: f64) {
        self.min_period = seconds;
    }

    pub fn change_by(&self) -> f64 {
        self.change_by
    }
    pub fn set_change_by(&mut self, change: f64) {
        self.change_by = change;
    }

    pub fn low_limit(&self) -> f64 {
        self.low_limit
    }
    pub fn set_low_limit(&mut self, limit: f64) {
        self.low_limit = limit;
    }

    pub fn high_limit(&self) -> f64 {
        self.high_limit
    }
    pub fn set_high_limit(&mut self, limit: f64) {
        self.high_limit = limit;
    }

    pub fn buffer_max_count(&self) -> u32 {
        self.buffer_max
    }
    pub fn set_buffer_max_count(&mut self, count: u32) {
        self.buffer_max = count;
        while self.buffer.len() > count as usize {
            self.buffer.pop_front();
        }
    }

    pub fn backup_period(&self) -> u32 {
        self.backup_period
    }
    pub fn set_backup_period(&mut self, seconds: u32) {
        self.backup_period = seconds;
    }

    pub fn json_extraction(&self) -> Option<&Extraction> {
        self.json_extraction.as_ref()
    }
    pub fn set_json_extraction(&mut self, extraction: Option<Extraction>) {
        self.json_extraction = extraction;
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }
    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
    pub fn set_destination(&mut self, destination: &str) {
        self.destination = destination.to_string();
    }

    pub fn is_config_managed(&self) -> bool {
        self.config_managed
    }
    pub fn mark_config_managed(&mut self) {
        self.config_managed = true;
    }

    pub fn is_relevant(&self) -> bool {
        self.relevant
    }
    pub fn set_relevant(&mut self, relevant: bool) {
        self.relevant = relevant;
    }

    pub fn buffer(&self) -> &VecDeque<Rc<Sample>> {
        &self.buffer
    }

    /// Replace the buffer contents, e.g. when restoring a backup.
    pub fn restore_buffer(&mut self, samples: Vec<Sample>) {
        self.buffer = samples.into_iter().map(Rc::new).collect();
        while self.buffer.len() > self.buffer_max as usize {
            self.buffer.pop_front();
        }
    }
}

impl Default for ObsState {
    fn default() -> Self {
        ObsState::new()
    }
}

fn numeric_view(sample: &Rc<Sample>) -> Option<f64> {
    numeric_view_ref(sample)
}

fn numeric_view_ref(sample: &Rc<Sample>) -> Option<f64> {
    match sample.value() {
        Value::Numeric(n) => Some(*n),
        Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
