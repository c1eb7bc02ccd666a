//! Registered push-handler callbacks.
//!
//! Handlers live in one hub-wide table and are referenced by opaque
//! generational refs, so a caller-held ref that outlives its handler (or
//! its resource) is rejected instead of dangling. Resources keep their
//! handler refs in registration order; dispatch walks that order.

use std::rc::Rc;

use sample::DataType;

use crate::hub::DataHub;
use crate::tree::EntryId;

/// Opaque reference to a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerRef {
    index: u32,
    gen: u32,
}

/// A typed push callback. Each variant receives the sample timestamp and
/// the payload for its type; callbacks may re-enter the hub.
#[derive(Clone)]
pub enum Callback {
    Trigger(Rc<dyn Fn(&mut DataHub, f64)>),
    Boolean(Rc<dyn Fn(&mut DataHub, f64, bool)>),
    Numeric(Rc<dyn Fn(&mut DataHub, f64, f64)>),
    String(Rc<dyn Fn(&mut DataHub, f64, &str)>),
    Json(Rc<dyn Fn(&mut DataHub, f64, &serde_json::Value)>),
}

impl Callback {
    pub fn data_type(&self) -> DataType {
        match self {
            Callback::Trigger(_) => DataType::Trigger,
            Callback::Boolean(_) => DataType::Boolean,
            Callback::Numeric(_) => DataType::Numeric,
            Callback::String(_) => DataType::String,
            Callback::Json(_) => DataType::Json,
        }
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Callback({})", self.data_type())
    }
}

pub struct HandlerRecord {
    pub owner: EntryId,
    pub callback: Callback,
}

struct Slot {
    gen: u32,
    record: Option<HandlerRecord>,
}

/// The hub-wide handler table.
pub struct HandlerTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl HandlerTable {
    pub fn new() -> HandlerTable {
        HandlerTable {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn add(&mut self, owner: EntryId, callback: Callback) -> HandlerRef {
        let record = HandlerRecord { owner, callback };
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.record = Some(record);
                HandlerRef {
                    index,
                    gen: slot.gen,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    gen: 0,
                    record: Some(record),
                });
                HandlerRef { index, gen: 0 }
            }
        }
    }

    pub fn get(&self, handler: HandlerRef) -> Option<&HandlerRecord> {
        let slot = self.slots.get(handler.index as usize)?;
        if slot.gen != handler.gen {
            return None;
        }
        slot.record.as_ref()
    }

    /// Drop a handler, invalidating its ref.
    pub fn remove(&mut self, handler: HandlerRef) -> Option<HandlerRecord> {
        let slot = self.slots.get_mut(handler.index as usize)?;
        if slot.gen != handler.gen {
            return None;
        }
        let record = slot.record.take()?;
        slot.gen = slot.gen.wrapping_add(1);
        self.free.push(handler.index);
        Some(record)
    }

    /// Release a batch of refs, e.g. when their resource is discarded.
    pub fn release_all(&mut self, handlers: &[HandlerRef]) {
        for handler in handlers {
            let _ = self.remove(*handler);
        }
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        HandlerTable::new()
    }
}
