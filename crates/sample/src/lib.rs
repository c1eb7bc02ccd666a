//! The value model of the data hub: timestamped, dynamically typed samples.
//!
//! A `Sample` is an immutable `(timestamp, Value)` record. Resources share
//! samples by reference counting; nothing in this crate mutates a sample
//! after construction.

use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum byte length of a string sample value rendered by a bounded
/// conversion.
pub const MAX_STRING_LEN: usize = 1023;

/// Runtime data type of a sample or resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// An event with no payload.
    Trigger,
    Boolean,
    Numeric,
    String,
    Json,
}

impl DataType {
    /// A printable name, e.g. "numeric".
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Trigger => "trigger",
            DataType::Boolean => "boolean",
            DataType::Numeric => "numeric",
            DataType::String => "string",
            DataType::Json => "json",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Value holds the possible payloads of a sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Trigger,
    Boolean(bool),
    Numeric(f64),
    String(String),
    Json(serde_json::Value),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Trigger => DataType::Trigger,
            Value::Boolean(_) => DataType::Boolean,
            Value::Numeric(_) => DataType::Numeric,
            Value::String(_) => DataType::String,
            Value::Json(_) => DataType::Json,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertError {
    #[error("rendered value exceeds the string capacity")]
    Overflow,
    #[error("value cannot be converted to the requested type")]
    TypeMismatch,
}

static JSON_NULL: serde_json::Value = serde_json::Value::Null;

/// An immutable, timestamped sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    timestamp: f64,
    value: Value,
}

impl Sample {
    /// Build a sample. A `timestamp` of zero is replaced with the current
    /// wall-clock time.
    pub fn new(timestamp: f64, value: Value) -> Sample {
        let timestamp = if timestamp == 0.0 {
            now_timestamp()
        } else {
            timestamp
        };
        Sample { timestamp, value }
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn data_type(&self) -> DataType {
        self.value.data_type()
    }

    /// The boolean payload, or false when the sample is not Boolean.
    pub fn as_bool(&self) -> bool {
        match &self.value {
            Value::Boolean(b) => *b,
            _ => false,
        }
    }

    /// The numeric payload, or 0.0 when the sample is not Numeric.
    pub fn as_numeric(&self) -> f64 {
        match &self.value {
            Value::Numeric(n) => *n,
            _ => 0.0,
        }
    }

    /// The string payload, or "" when the sample is not String.
    pub fn as_str(&self) -> &str {
        match &self.value {
            Value::String(s) => s,
            _ => "",
        }
    }

    /// The JSON payload, or null when the sample is not Json.
    pub fn as_json(&self) -> &serde_json::Value {
        match &self.value {
            Value::Json(v) => v,
            _ => &JSON_NULL,
        }
    }

    /// Render the sample value as plain text, bounded by `cap` bytes.
    ///
    /// Triggers render as the empty string, booleans as `true`/`false`,
    /// numerics as the shortest round-tripping decimal, and JSON values as
    /// their compact serialization.
    pub fn convert_to_string(&self, cap: usize) -> Result<String, ConvertError> {
        let out = match &self.value {
            Value::Trigger => String::new(),
            Value::Boolean(b) => b.to_string(),
            Value::Numeric(n) => format_numeric(*n),
            Value::String(s) => s.clone(),
            Value::Json(v) => compact_json(v),
        };
        if out.len() > cap {
            return Err(ConvertError::Overflow);
        }
        Ok(out)
    }

    /// Render the sample value as JSON text, bounded by `cap` bytes.
    ///
    /// Triggers render as `null` and strings are quoted. Non-finite
    /// numerics, which have no JSON representation, render as `null`.
    pub fn convert_to_json(&self, cap: usize) -> Result<String, ConvertError> {
        let out = compact_json(&self.to_json_value());
        if out.len() > cap {
            return Err(ConvertError::Overflow);
        }
        Ok(out)
    }

    /// The sample value as a JSON document.
    pub fn to_json_value(&self) -> serde_json::Value {
        match &self.value {
            Value::Trigger => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Numeric(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Json(v) => v.clone(),
        }
    }

    /// Replace this sample with one of data type `to`, keeping the
    /// timestamp. Fails with `TypeMismatch` when no documented conversion
    /// applies, or `Overflow` when a string rendering exceeds `cap`.
    pub fn coerce(&self, to: DataType, cap: usize) -> Result<Sample, ConvertError> {
        if self.data_type() == to {
            return Ok(self.clone());
        }
        let value = match to {
            DataType::Trigger => Value::Trigger,
            // A JSON string scalar coerces to its raw contents; everything
            // else renders through the string conversion.
            DataType::String => match &self.value {
                Value::Json(serde_json::Value::String(s)) => Value::String(s.clone()),
                _ => Value::String(self.convert_to_string(cap)?),
            },
            DataType::Json => Value::Json(self.to_json_value()),
            DataType::Boolean => match &self.value {
                Value::Numeric(n) => Value::Boolean(*n != 0.0),
                Value::String(s) => match s.as_str() {
                    "true" => Value::Boolean(true),
                    "false" => Value::Boolean(false),
                    _ => return Err(ConvertError::TypeMismatch),
                },
                Value::Json(serde_json::Value::Bool(b)) => Value::Boolean(*b),
                _ => return Err(ConvertError::TypeMismatch),
            },
            DataType::Numeric => match &self.value {
                Value::Boolean(b) => Value::Numeric(if *b { 1.0 } else { 0.0 }),
                Value::String(s) => match s.parse::<f64>() {
                    Ok(n) => Value::Numeric(n),
                    Err(_) => return Err(ConvertError::TypeMismatch),
                },
                Value::Json(serde_json::Value::Number(n)) => {
                    Value::Numeric(n.as_f64().ok_or(ConvertError::TypeMismatch)?)
                }
                _ => return Err(ConvertError::TypeMismatch),
            },
        };
        Ok(Sample {
            timestamp: self.timestamp,
            value,
        })
    }
}

/// Current wall-clock time as seconds since the epoch.
pub fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Shortest decimal rendering of `n` that round-trips through `f64`.
fn format_numeric(n: f64) -> String {
    // f64's Display is the shortest representation that parses back equal.
    n.to_string()
}

fn compact_json(v: &serde_json::Value) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "null".to_string())
}
