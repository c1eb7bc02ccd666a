//! The destination registry: symbolic names routed to out-of-tree
//! consumers.

use std::rc::Rc;

use sample::{DataType, Sample, Value};

use crate::error::{Error, Result};
use crate::hub::DataHub;

/// Number of destination slots.
pub const DESTINATION_CAPACITY: usize = 6;

/// What a destination callback receives for one delivered sample. Typed
/// fields that do not apply to `data_type` are zeroed.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationEvent {
    pub timestamp: f64,
    pub obs_name: String,
    /// Absolute path of the observation's source, with the JSON extraction
    /// spec appended when one is configured.
    pub src_path: String,
    pub data_type: DataType,
    pub bool_value: bool,
    pub numeric_value: f64,
    pub string_value: String,
}

impl DestinationEvent {
    pub fn new(obs_name: String, src_path: String, sample: &Sample) -> DestinationEvent {
        let mut event = DestinationEvent {
            timestamp: sample.timestamp(),
            obs_name,
            src_path,
            data_type: sample.data_type(),
            bool_value: false,
            numeric_value: 0.0,
            string_value: String::new(),
        };
        match sample.value() {
            Value::Trigger => {}
            Value::Boolean(b) => event.bool_value = *b,
            Value::Numeric(n) => event.numeric_value = *n,
            Value::String(s) => event.string_value = s.clone(),
            Value::Json(v) => {
                event.string_value =
                    serde_json::to_string(v).unwrap_or_else(|_| "null".to_string())
            }
        }
        event
    }
}

/// Callback invoked when an observation delivers to a named destination.
pub type DestinationCallback = Rc<dyn Fn(&mut DataHub, &DestinationEvent)>;

/// Opaque reference to a registered destination callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationRef {
    index: u32,
    gen: u32,
}

struct Record {
    name: String,
    callback: DestinationCallback,
}

struct Slot {
    gen: u32,
    record: Option<Record>,
}

/// Fixed-capacity table of destination callbacks.
pub struct DestinationTable {
    slots: Vec<Slot>,
}

impl DestinationTable {
    pub fn new() -> DestinationTable {
        DestinationTable {
            slots: (0..DESTINATION_CAPACITY)
                .map(|_| Slot {
                    gen: 0,
                    record: None,
                })
                .collect(),
        }
    }

    /// Store a callback in the first free slot. `NoMemory` when all slots
    /// are taken.
    pub fn add(&mut self, name: &str, callback: DestinationCallback) -> Result<DestinationRef> {
        if name.is_empty() {
            return Err(Error::bad_parameter("empty destination name"));
        }
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.record.is_none() {
                slot.record = Some(Record {
                    name: name.to_string(),
                    callback,
                });
                return Ok(DestinationRef {
                    index: index as u32,
                    gen: slot.gen,
                });
            }
        }
        tracing::warn!(destination = name, "destination table is full");
        Err(Error::NoMemory)
    }

    pub fn remove(&mut self, dest: DestinationRef) -> Result<()> {
        let slot = self
            .slots
            .get_mut(dest.index as usize)
            .ok_or(Error::NotFound)?;
        if slot.gen != dest.gen || slot.record.is_none() {
            return Err(Error::NotFound);
        }
        slot.record = None;
        slot.gen = slot.gen.wrapping_add(1);
        Ok(())
    }

    /// First callback registered under `name`, if any.
    pub fn find(&self, name: &str) -> Option<DestinationCallback> {
        self.slots
            .iter()
            .filter_map(|slot| slot.record.as_ref())
            .find(|record| record.name == name)
            .map(|record| record.callback.clone())
    }
}

impl Default for DestinationTable {
    fn default() -> Self {
        DestinationTable::new()
    }
}
