//! Per-resource data-flow state: current value, default, override, source
//! back-link, and fan-out lists.

use std::rc::Rc;

use sample::{DataType, Sample};

use crate::handler::HandlerRef;
use crate::obs::ObsState;
use crate::tree::{EntryId, EntryKind};

/// Maximum byte length of an Input/Output units string.
pub const MAX_UNITS_LEN: usize = 31;

/// The concrete kind of a resource attached to a tree entry.
#[derive(Debug, Clone)]
pub enum Variant {
    Input { data_type: DataType, units: String },
    Output { data_type: DataType, units: String },
    Placeholder,
    Observation(ObsState),
}

/// A resource: the data-bearing object of a non-namespace entry.
#[derive(Debug, Clone)]
pub struct Resource {
    variant: Variant,
    /// Latest received type; only meaningful for dynamically typed
    /// resources (Observation, Placeholder).
    dynamic_type: DataType,
    current: Option<Rc<Sample>>,
    default: Option<(DataType, Rc<Sample>)>,
    override_value: Option<(DataType, Rc<Sample>)>,
    source: Option<EntryId>,
    /// Resources whose `source` is this one, in insertion order. Stale ids
    /// are skipped during fan-out.
    dests: Vec<EntryId>,
    handlers: Vec<HandlerRef>,
}

impl Resource {
    pub fn new_input(data_type: DataType, units: &str) -> Resource {
        Resource::with_variant(Variant::Input {
            data_type,
            units: units.to_string(),
        })
    }

    pub fn new_output(data_type: DataType, units: &str) -> Resource {
        Resource::with_variant(Variant::Output {
            data_type,
            units: units.to_string(),
        })
    }

    pub fn new_placeholder() -> Resource {
        Resource::with_variant(Variant::Placeholder)
    }

    pub fn new_observation() -> Resource {
        Resource::with_variant(Variant::Observation(ObsState::new()))
    }

    fn with_variant(variant: Variant) -> Resource {
        Resource {
            variant,
            dynamic_type: DataType::Trigger,
            current: None,
            default: None,
            override_value: None,
            source: None,
            dests: Vec::new(),
            handlers: Vec::new(),
        }
    }

    pub fn kind(&self) -> EntryKind {
        match &self.variant {
            Variant::Input { .. } => EntryKind::Input,
            Variant::Output { .. } => EntryKind::Output,
            Variant::Placeholder => EntryKind::Placeholder,
            Variant::Observation(_) => EntryKind::Observation,
        }
    }

    pub fn is_io(&self) -> bool {
        matches!(
            self.variant,
            Variant::Input { .. } | Variant::Output { .. }
        )
    }

    /// The fixed type of an Input/Output, or none for dynamic resources.
    pub fn io_data_type(&self) -> Option<DataType> {
        match &self.variant {
            Variant::Input { data_type, .. } | Variant::Output { data_type, .. } => {
                Some(*data_type)
            }
            _ => None,
        }
    }

    /// The current data type: fixed for I/O, latest received otherwise.
    pub fn data_type(&self) -> DataType {
        self.io_data_type().unwrap_or(self.dynamic_type)
    }

    pub fn units(&self) -> &str {
        match &self.variant {
            Variant::Input { units, .. } | Variant::Output { units, .. } => units,
            _ => "",
        }
    }

    pub fn current(&self) -> Option<&Rc<Sample>> {
        self.current.as_ref()
    }

    /// Store a new current value, adopting its type on dynamic resources.
    pub fn store_current(&mut self, sample: Rc<Sample>) {
        if !self.is_io() {
            self.dynamic_type = sample.data_type();
        }
        self.current = Some(sample);
    }

    pub fn default_value(&self) -> Option<&(DataType, Rc<Sample>)> {
        self.default.as_ref()
    }

    pub fn set_default(&mut self, data_type: DataType, sample: Rc<Sample>) {
        self.default = Some((data_type, sample));
    }

    pub fn remove_default(&mut self) {
        self.default = None;
    }

    pub fn override_value(&self) -> Option<&(DataType, Rc<Sample>)> {
        self.override_value.as_ref()
    }

    pub fn set_override(&mut self, data_type: DataType, sample: Rc<Sample>) {
        self.override_value = Some((data_type, sample));
    }

    pub fn remove_override(&mut self) {
        self.override_value = None;
    }

    pub fn source(&self) -> Option<EntryId> {
        self.source
    }

    pub(crate) fn set_source_link(&mut self, source: Option<EntryId>) {
        self.source = source;
    }

    pub fn dests(&self) -> &[EntryId] {
        &self.dests
    }

    pub(crate) fn add_dest(&mut self, dest: EntryId) {
        if !self.dests.contains(&dest) {
            self.dests.push(dest);
        }
    }

    pub(crate) fn remove_dest(&mut self, dest: EntryId) {
        self.dests.retain(|d| *d != dest);
    }

    pub fn handlers(&self) -> &[HandlerRef] {
        &self.handlers
    }

    pub(crate) fn add_handler(&mut self, handler: HandlerRef) {
        self.handlers.push(handler);
    }

    pub(crate) fn remove_handler(&mut self, handler: HandlerRef) {
        self.handlers.retain(|h| *h != handler);
    }

    pub(crate) fn take_handlers(&mut self) -> Vec<HandlerRef> {
        std::mem::take(&mut self.handlers)
    }

    pub fn observation(&self) -> Option<&ObsState> {
        match &self.variant {
            Variant::Observation(obs) => Some(obs),
            _ => None,
        }
    }

    pub fn observation_mut(&mut self) -> Option<&mut ObsState> {
        match &mut self.variant {
            Variant::Observation(obs) => Some(obs),
            _ => None,
        }
    }

    /// Whether administrative settings are present: a default, an override,
    /// a source route, or any non-default observation configuration.
    pub fn has_admin_settings(&self) -> bool {
        self.default.is_some()
            || self.override_value.is_some()
            || self.source.is_some()
            || self
                .observation()
                .map(|obs| obs.has_non_default_config())
                .unwrap_or(false)
    }

    /// Move the administrative settings of `old` onto this resource.
    ///
    /// Default, override, source, and incoming routes survive a resource
    /// replacement; observation filter settings and push handlers do not.
    pub(crate) fn move_admin_settings(&mut self, old: &mut Resource) {
        self.default = old.default.take();
        self.override_value = old.override_value.take();
        self.source = old.source.take();
        self.dests = std::mem::take(&mut old.dests);
    }
}
