//! The data hub facade: one object owning the resource tree, the handler
//! table, the destination registry, and the buffer backup store.
//!
//! Everything runs on one thread. Callbacks receive `&mut DataHub` and may
//! re-enter push operations; a push started inside a callback completes
//! depth-first before the outer push returns. Fan-out iterates
//! generation-checked snapshots, so callbacks may delete the very entries
//! being fanned out to.

use std::collections::HashSet;
use std::rc::Rc;

use sample::{DataType, Sample, Value, MAX_STRING_LEN};

use crate::backup::BackupStore;
use crate::destination::{
    DestinationCallback, DestinationEvent, DestinationRef, DestinationTable,
};
use crate::error::{Error, Result};
use crate::extraction::Extraction;
use crate::handler::{Callback, HandlerRef, HandlerTable};
use crate::obs::Transform;
use crate::path;
use crate::tree::{EntryId, EntryKind, Tree};

/// The hub. All state transitions go through methods on this type.
pub struct DataHub {
    tree: Tree,
    handlers: HandlerTable,
    destinations: DestinationTable,
    backups: Option<BackupStore>,
    config_session: bool,
    config_stop: bool,
}

impl DataHub {
    pub fn new() -> DataHub {
        DataHub {
            tree: Tree::new(),
            handlers: HandlerTable::new(),
            destinations: DestinationTable::new(),
            backups: None,
            config_session: false,
            config_stop: false,
        }
    }

    /// A hub that persists observation buffers under `store`'s directory.
    pub fn with_backup_store(store: BackupStore) -> DataHub {
        let mut hub = DataHub::new();
        hub.backups = Some(store);
        hub
    }

    // ---- lookup helpers ----

    /// Find the entry at an absolute path.
    pub fn find_entry(&self, abs_path: &str) -> Option<EntryId> {
        path::check_absolute(abs_path).ok()?;
        self.tree.find(self.tree.root(), abs_path)
    }

    fn resolve(&self, abs_path: &str) -> Result<EntryId> {
        path::check_absolute(abs_path)?;
        self.tree
            .find(self.tree.root(), abs_path)
            .ok_or(Error::NotFound)
    }

    fn resolve_or_create_resource(&mut self, abs_path: &str) -> Result<EntryId> {
        path::check_absolute(abs_path)?;
        let root = self.tree.root();
        self.tree.get_resource(root, abs_path)
    }

    /// Normalize an observation path: `/obs/x` and plain `x` both name the
    /// observation `x` under the reserved `/obs/` namespace.
    fn obs_rel(path_str: &str) -> Result<&str> {
        if let Some(rest) = path_str.strip_prefix("/obs/") {
            path::check_relative(rest)?;
            Ok(rest)
        } else if path_str.starts_with('/') {
            Err(Error::bad_parameter("observations live under /obs/"))
        } else {
            path::check_relative(path_str)?;
            Ok(path_str)
        }
    }

    /// Find an Observation by `/obs/`-relative name or `/obs/…` path.
    pub fn find_observation(&self, path_str: &str) -> Result<EntryId> {
        self.obs_entry(path_str)
    }

    fn obs_entry(&self, path_str: &str) -> Result<EntryId> {
        let rel = Self::obs_rel(path_str)?;
        let obs_ns = self.tree.find(self.tree.root(), "obs").ok_or(Error::NotFound)?;
        let id = self.tree.find(obs_ns, rel).ok_or(Error::NotFound)?;
        match self.tree.entry(id).map(|e| e.kind()) {
            Some(EntryKind::Observation) => Ok(id),
            _ => Err(Error::NotFound),
        }
    }

    fn with_obs<T>(
        &mut self,
        path_str: &str,
        f: impl FnOnce(&mut crate::obs::ObsState) -> T,
    ) -> Result<T> {
        let id = self.obs_entry(path_str)?;
        let obs = self
            .tree
            .entry_mut(id)
            .and_then(|e| e.resource_mut())
            .and_then(|r| r.observation_mut())
            .expect("observation entry has observation state");
        Ok(f(obs))
    }

    // ---- observation administration ----

    /// Create an Observation under `/obs/`. Succeeds when one already
    /// exists at the path; refuses to displace an Input or Output.
    pub fn create_obs(&mut self, path_str: &str) -> Result<()> {
        let rel = Self::obs_rel(path_str)?.to_string();
        let root = self.tree.root();
        let obs_ns = self.tree.get(root, "obs")?;
        let (id, released, _created) = self.tree.get_observation(obs_ns, &rel)?;
        self.handlers.release_all(&released);
        self.maybe_restore_backup(id);
        Ok(())
    }

    /// Delete an Observation and its buffer backup.
    pub fn delete_obs(&mut self, path_str: &str) -> Result<()> {
        let id = self.obs_entry(path_str)?;
        self.delete_observation_by_id(id)
    }

    pub fn set_min_period(&mut self, path_str: &str, seconds: f64) -> Result<()> {
        self.with_obs(path_str, |obs| obs.set_min_period(seconds))
    }

    pub fn min_period(&mut self, path_str: &str) -> Result<f64> {
        self.with_obs(path_str, |obs| obs.min_period())
    }

    pub fn set_high_limit(&mut self, path_str: &str, limit: f64) -> Result<()> {
        self.with_obs(path_str, |obs| obs.set_high_limit(limit))
    }

    pub fn high_limit(&mut self, path_str: &str) -> Result<f64> {
        self.with_obs(path_str, |obs| obs.high_limit())
    }

    pub fn set_low_limit(&mut self, path_str: &str, limit: f64) -> Result<()> {
        self.with_obs(path_str, |obs| obs.set_low_limit(limit))
    }

    pub fn low_limit(&mut self, path_str: &str) -> Result<f64> {
        self.with_obs(path_str, |obs| obs.low_limit())
    }

    pub fn set_change_by(&mut self, path_str: &str, change: f64) -> Result<()> {
        self.with_obs(path_str, |obs| obs.set_change_by(change))
    }

    pub fn change_by(&mut self, path_str: &str) -> Result<f64> {
        self.with_obs(path_str, |obs| obs.change_by())
    }

    pub fn set_transform(&mut self, path_str: &str, transform: Transform) -> Result<()> {
        self.with_obs(path_str, |obs| obs.set_transform(transform))
    }

    pub fn transform(&mut self, path_str: &str) -> Result<Transform> {
        self.with_obs(path_str, |obs| obs.transform())
    }

    pub fn set_buffer_max_count(&mut self, path_str: &str, count: u32) -> Result<()> {
        let id = self.obs_entry(path_str)?;
        self.with_obs(path_str, |obs| obs.set_buffer_max_count(count))?;
        self.maybe_restore_backup(id);
        Ok(())
    }

    pub fn buffer_max_count(&mut self, path_str: &str) -> Result<u32> {
        self.with_obs(path_str, |obs| obs.buffer_max_count())
    }

    pub fn set_backup_period(&mut self, path_str: &str, seconds: u32) -> Result<()> {
        let id = self.obs_entry(path_str)?;
        self.with_obs(path_str, |obs| obs.set_backup_period(seconds))?;
        self.maybe_restore_backup(id);
        Ok(())
    }

    pub fn backup_period(&mut self, path_str: &str) -> Result<u32> {
        self.with_obs(path_str, |obs| obs.backup_period())
    }

    /// Set or clear (empty spec) the JSON extraction of an observation.
    pub fn set_json_extraction(&mut self, path_str: &str, spec: &str) -> Result<()> {
        let extraction = if spec.is_empty() {
            None
        } else {
            Some(Extraction::parse(spec)?)
        };
        self.with_obs(path_str, |obs| obs.set_json_extraction(extraction))
    }

    pub fn json_extraction(&mut self, path_str: &str) -> Result<String> {
        self.with_obs(path_str, |obs| {
            obs.json_extraction()
                .map(|e| e.spec().to_string())
                .unwrap_or_default()
        })
    }

    /// Set or clear (empty name) an observation's destination name. Names
    /// beginning with `/` address tree resources and are wired with
    /// `set_source` instead.
    pub fn set_destination(&mut self, path_str: &str, destination: &str) -> Result<()> {
        if destination.starts_with('/') {
            return Err(Error::bad_parameter(
                "path destinations are wired as routes, not names",
            ));
        }
        self.with_obs(path_str, |obs| obs.set_destination(destination))
    }

    pub fn destination(&mut self, path_str: &str) -> Result<String> {
        self.with_obs(path_str, |obs| obs.destination().to_string())
    }

    // ---- routes ----

    /// Route samples from `src_path` into `dest_path`, creating
    /// Placeholder resources for missing endpoints.
    pub fn set_source(&mut self, dest_path: &str, src_path: &str) -> Result<()> {
        let dest = self.resolve_or_create_resource(dest_path)?;
        let src = self.resolve_or_create_resource(src_path)?;
        self.tree.set_source(dest, Some(src))
    }

    pub fn remove_source(&mut self, dest_path: &str) -> Result<()> {
        let dest = self.resolve(dest_path)?;
        self.tree.set_source(dest, None)
    }

    /// Absolute path of the route source feeding `dest_path`, if any.
    pub fn source_path(&self, dest_path: &str) -> Result<Option<String>> {
        let dest = self.resolve(dest_path)?;
        let source = self
            .tree
            .entry(dest)
            .and_then(|e| e.resource())
            .and_then(|r| r.source());
        Ok(source.and_then(|id| self.tree.path_of(id)))
    }

    // ---- defaults and overrides ----

    pub fn set_default(&mut self, path_str: &str, value: Value) -> Result<()> {
        let id = self.resolve_or_create_resource(path_str)?;
        let sample = Rc::new(Sample::new(0.0, value));
        let data_type = sample.data_type();
        let should_push = {
            let res = self
                .tree
                .entry_mut(id)
                .and_then(|e| e.resource_mut())
                .expect("resource was just created");
            res.set_default(data_type, sample.clone());
            let applies = res.io_data_type().map(|io| io == data_type).unwrap_or(true);
            applies && res.current().is_none()
        };
        if should_push {
            // A default landing on a virgin resource counts as a push.
            let _ = self.push_sample(id, sample);
        }
        Ok(())
    }

    pub fn has_default(&self, path_str: &str) -> Result<bool> {
        let id = self.resolve(path_str)?;
        Ok(self
            .tree
            .entry(id)
            .and_then(|e| e.resource())
            .map(|r| r.default_value().is_some())
            .unwrap_or(false))
    }

    pub fn default_value(&self, path_str: &str) -> Result<Option<(DataType, Rc<Sample>)>> {
        let id = self.resolve(path_str)?;
        Ok(self
            .tree
            .entry(id)
            .and_then(|e| e.resource())
            .and_then(|r| r.default_value().cloned()))
    }

    pub fn remove_default(&mut self, path_str: &str) -> Result<()> {
        let id = self.resolve(path_str)?;
        let res = self
            .tree
            .entry_mut(id)
            .and_then(|e| e.resource_mut())
            .ok_or(Error::NotFound)?;
        res.remove_default();
        self.tree.collect_placeholder(id);
        Ok(())
    }

    pub fn set_override(&mut self, path_str: &str, value: Value) -> Result<()> {
        let id = self.resolve_or_create_resource(path_str)?;
        let sample = Rc::new(Sample::new(0.0, value));
        let data_type = sample.data_type();
        self.tree
            .entry_mut(id)
            .and_then(|e| e.resource_mut())
            .expect("resource was just created")
            .set_override(data_type, sample);
        Ok(())
    }

    pub fn is_overridden(&self, path_str: &str) -> Result<bool> {
        let id = self.resolve(path_str)?;
        Ok(self
            .tree
            .entry(id)
            .and_then(|e| e.resource())
            .map(|r| r.override_value().is_some())
            .unwrap_or(false))
    }

    pub fn remove_override(&mut self, path_str: &str) -> Result<()> {
        let id = self.resolve(path_str)?;
        let res = self
            .tree
            .entry_mut(id)
            .and_then(|e| e.resource_mut())
            .ok_or(Error::NotFound)?;
        res.remove_override();
        self.tree.collect_placeholder(id);
        Ok(())
    }

    // ---- pushing ----

    /// Push a value to any absolute path, creating a Placeholder when the
    /// resource does not exist yet.
    pub fn push(&mut self, path_str: &str, timestamp: f64, value: Value) -> Result<()> {
        let id = self.resolve_or_create_resource(path_str)?;
        self.push_sample(id, Rc::new(Sample::new(timestamp, value)))
    }

    pub fn push_trigger(&mut self, path_str: &str, timestamp: f64) -> Result<()> {
        self.push(path_str, timestamp, Value::Trigger)
    }

    pub fn push_boolean(&mut self, path_str: &str, timestamp: f64, value: bool) -> Result<()> {
        self.push(path_str, timestamp, Value::Boolean(value))
    }

    pub fn push_numeric(&mut self, path_str: &str, timestamp: f64, value: f64) -> Result<()> {
        self.push(path_str, timestamp, Value::Numeric(value))
    }

    pub fn push_string(&mut self, path_str: &str, timestamp: f64, value: &str) -> Result<()> {
        self.push(path_str, timestamp, Value::String(value.to_string()))
    }

    /// Push JSON text; malformed JSON is a `FormatError`.
    pub fn push_json(&mut self, path_str: &str, timestamp: f64, json_text: &str) -> Result<()> {
        let value: serde_json::Value = serde_json::from_str(json_text)
            .map_err(|err| Error::FormatError(err.to_string()))?;
        self.push(path_str, timestamp, Value::Json(value))
    }

    /// The push engine. See the module comment for re-entrancy rules.
    pub(crate) fn push_sample(&mut self, id: EntryId, sample: Rc<Sample>) -> Result<()> {
        struct Delivery {
            destination: String,
            obs_name: String,
            source: Option<EntryId>,
            extraction: String,
        }

        let mut delivery: Option<Delivery> = None;
        let mut backup: Option<Vec<Rc<Sample>>> = None;

        let (emitted, handler_refs, dest_ids) = {
            let Some(entry) = self.tree.entry_mut(id) else {
                return Ok(()); // Stale id: the entry went away mid-flight.
            };
            let obs_name = entry.name().to_string();
            let Some(res) = entry.resource_mut() else {
                return Ok(()); // Namespaces swallow pushes.
            };

            let mut sample = sample;

            // Overrides replace the value, keeping the timestamp. On I/O
            // resources the override only applies when its type matches.
            if let Some((override_type, override_sample)) = res.override_value() {
                let applies = match res.io_data_type() {
                    Some(io_type) => *override_type == io_type,
                    None => true,
                };
                if applies {
                    sample = Rc::new(Sample::new(
                        sample.timestamp(),
                        override_sample.value().clone(),
                    ));
                }
            }

            // I/O resources have a fixed type; coerce or drop.
            if let Some(io_type) = res.io_data_type() {
                if sample.data_type() != io_type {
                    match sample.coerce(io_type, MAX_STRING_LEN) {
                        Ok(coerced) => sample = Rc::new(coerced),
                        Err(err) => {
                            tracing::debug!(
                                got = sample.data_type().name(),
                                want = io_type.name(),
                                error = %err,
                                "dropping sample on type mismatch"
                            );
                            return Err(Error::TypeMismatch);
                        }
                    }
                }
            }

            let source = res.source();
            if let Some(obs) = res.observation_mut() {
                let Some(accepted) = obs.ingest(sample) else {
                    return Ok(()); // Filtered out.
                };
                sample = accepted;
                if obs.backup_due(sample::now_timestamp()) {
                    backup = Some(obs.buffer().iter().cloned().collect());
                }
                let destination = obs.destination().to_string();
                if !destination.is_empty() && !destination.starts_with('/') {
                    delivery = Some(Delivery {
                        destination,
                        obs_name,
                        source,
                        extraction: obs
                            .json_extraction()
                            .map(|e| e.spec().to_string())
                            .unwrap_or_default(),
                    });
                }
            }

            res.store_current(sample.clone());
            (sample, res.handlers().to_vec(), res.dests().to_vec())
        };

        if let Some(buffer) = backup {
            self.save_backup(id, &buffer);
        }

        if let Some(d) = delivery {
            let mut src_path = d
                .source
                .and_then(|src| self.tree.path_of(src))
                .unwrap_or_default();
            if !d.extraction.is_empty() {
                src_path = format!("{}/{}", src_path, d.extraction);
            }
            let event = DestinationEvent::new(d.obs_name, src_path, &emitted);
            if let Err(err) = self.trigger_destination(&d.destination, &event) {
                tracing::debug!(
                    destination = d.destination,
                    error = %err,
                    "destination delivery failed"
                );
            }
        }

        for handler in handler_refs {
            self.call_handler(handler, &emitted);
        }

        // Downstream fan-out, in route insertion order. Entries that died
        // or re-routed since the snapshot are skipped.
        for dest in dest_ids {
            let still_routed = self
                .tree
                .entry(dest)
                .and_then(|e| e.resource())
                .map(|r| r.source() == Some(id))
                .unwrap_or(false);
            if still_routed {
                let _ = self.push_sample(dest, emitted.clone());
            }
        }

        Ok(())
    }

    fn call_handler(&mut self, handler: HandlerRef, sample: &Rc<Sample>) {
        let Some(callback) = self.handlers.get(handler).map(|r| r.callback.clone()) else {
            return; // Removed by an earlier handler in this fan-out.
        };
        let ts = sample.timestamp();
        match (&callback, sample.value()) {
            (Callback::Trigger(f), Value::Trigger) => f(self, ts),
            (Callback::Boolean(f), Value::Boolean(b)) => f(self, ts, *b),
            (Callback::Numeric(f), Value::Numeric(n)) => f(self, ts, *n),
            (Callback::String(f), Value::String(s)) => {
                let s = s.clone();
                f(self, ts, &s)
            }
            (Callback::Json(f), Value::Json(v)) => {
                let v = v.clone();
                f(self, ts, &v)
            }
            // Mismatched types: string and JSON handlers accept any sample
            // via conversion; everything else is skipped.
            (Callback::String(f), _) => match sample.convert_to_string(MAX_STRING_LEN) {
                Ok(text) => f(self, ts, &text),
                Err(err) => {
                    tracing::debug!(error = %err, "skipping string handler");
                }
            },
            (Callback::Json(f), _) => {
                let v = sample.to_json_value();
                let fits = serde_json::to_string(&v)
                    .map(|text| text.len() <= MAX_STRING_LEN)
                    .unwrap_or(false);
                if fits {
                    f(self, ts, &v)
                } else {
                    tracing::debug!("skipping JSON handler on oversized value");
                }
            }
            _ => {}
        }
    }

    // ---- push handlers ----

    /// Register a push handler on any absolute path, creating a
    /// Placeholder when needed.
    pub fn add_push_handler(&mut self, path_str: &str, callback: Callback) -> Result<HandlerRef> {
        let id = self.resolve_or_create_resource(path_str)?;
        Ok(self.add_handler_to(id, callback))
    }

    pub(crate) fn add_handler_to(&mut self, id: EntryId, callback: Callback) -> HandlerRef {
        let handler = self.handlers.add(id, callback);
        self.tree
            .entry_mut(id)
            .and_then(|e| e.resource_mut())
            .expect("handler owner is a resource")
            .add_handler(handler);
        handler
    }

    /// Remove a handler by ref. Stale refs are `NotFound`.
    pub fn remove_push_handler(&mut self, handler: HandlerRef) -> Result<()> {
        let record = self.handlers.remove(handler).ok_or(Error::NotFound)?;
        if let Some(res) = self
            .tree
            .entry_mut(record.owner)
            .and_then(|e| e.resource_mut())
        {
            res.remove_handler(handler);
        }
        self.tree.collect_placeholder(record.owner);
        Ok(())
    }

    // ---- destinations ----

    pub fn add_destination_handler(
        &mut self,
        name: &str,
        callback: DestinationCallback,
    ) -> Result<DestinationRef> {
        self.destinations.add(name, callback)
    }

    pub fn remove_destination_handler(&mut self, dest: DestinationRef) -> Result<()> {
        self.destinations.remove(dest)
    }

    /// Deliver an event to the first callback registered for
    /// `destination`. `NotFound` when nothing matches.
    pub fn trigger_destination(
        &mut self,
        destination: &str,
        event: &DestinationEvent,
    ) -> Result<()> {
        let callback = self
            .destinations
            .find(destination)
            .ok_or(Error::NotFound)?;
        callback(self, event);
        Ok(())
    }

    // ---- queries ----

    pub fn current_value(&self, path_str: &str) -> Result<Option<Rc<Sample>>> {
        let id = self.resolve(path_str)?;
        Ok(self
            .tree
            .entry(id)
            .and_then(|e| e.resource())
            .and_then(|r| r.current().cloned()))
    }

    pub fn data_type(&self, path_str: &str) -> Result<DataType> {
        let id = self.resolve(path_str)?;
        self.tree
            .entry(id)
            .and_then(|e| e.resource())
            .map(|r| r.data_type())
            .ok_or(Error::NotFound)
    }

    pub fn units(&self, path_str: &str) -> Result<String> {
        let id = self.resolve(path_str)?;
        self.tree
            .entry(id)
            .and_then(|e| e.resource())
            .map(|r| r.units().to_string())
            .ok_or(Error::NotFound)
    }

    pub fn entry_kind(&self, path_str: &str) -> Result<EntryKind> {
        let id = self.resolve(path_str)?;
        self.tree.entry(id).map(|e| e.kind()).ok_or(Error::NotFound)
    }

    // ---- tree walking ----

    pub fn root(&self) -> EntryId {
        self.tree.root()
    }

    pub fn first_child(&self, id: EntryId) -> Option<EntryId> {
        self.tree.first_child(id)
    }

    pub fn next_sibling(&self, id: EntryId) -> Option<EntryId> {
        self.tree.next_sibling(id)
    }

    pub fn entry_name(&self, id: EntryId) -> Option<String> {
        self.tree.entry(id).map(|e| e.name().to_string())
    }

    pub fn entry_kind_of(&self, id: EntryId) -> Option<EntryKind> {
        self.tree.entry(id).map(|e| e.kind())
    }

    pub fn entry_path(&self, id: EntryId) -> Option<String> {
        self.tree.path_of(id)
    }

    /// Snapshot of all entries in post order, for administrative sweeps.
    pub fn post_order_entries(&self) -> Vec<EntryId> {
        self.tree.post_order_ids()
    }

    // ---- configuration support ----

    pub fn observation_is_config_managed(&self, id: EntryId) -> bool {
        self.tree
            .entry(id)
            .and_then(|e| e.resource())
            .and_then(|r| r.observation())
            .map(|obs| obs.is_config_managed())
            .unwrap_or(false)
    }

    pub fn mark_observation_config_managed(&mut self, id: EntryId) {
        if let Some(obs) = self
            .tree
            .entry_mut(id)
            .and_then(|e| e.resource_mut())
            .and_then(|r| r.observation_mut())
        {
            obs.mark_config_managed();
        }
    }

    pub fn observation_is_relevant(&self, id: EntryId) -> bool {
        self.tree
            .entry(id)
            .and_then(|e| e.resource())
            .and_then(|r| r.observation())
            .map(|obs| obs.is_relevant())
            .unwrap_or(false)
    }

    pub fn set_observation_relevance(&mut self, id: EntryId, relevant: bool) {
        if let Some(obs) = self
            .tree
            .entry_mut(id)
            .and_then(|e| e.resource_mut())
            .and_then(|r| r.observation_mut())
        {
            obs.set_relevant(relevant);
        }
    }

    /// Delete an observation entry, releasing its handlers and backup.
    pub fn delete_observation_by_id(&mut self, id: EntryId) -> Result<()> {
        let obs_path = self.tree.path_of(id);
        let released = self.tree.delete_observation(id)?;
        self.handlers.release_all(&released);
        if let (Some(store), Some(obs_path)) = (&self.backups, obs_path) {
            store.delete(&obs_path);
        }
        Ok(())
    }

    /// Begin a configuration load window. Only one may be open.
    pub fn begin_config_session(&mut self) -> Result<()> {
        if self.config_session {
            return Err(Error::Busy);
        }
        self.config_session = true;
        self.config_stop = false;
        Ok(())
    }

    /// Close the configuration window: backups that no longer belong to a
    /// live observation are swept away.
    pub fn end_config_session(&mut self) {
        self.config_session = false;
        self.config_stop = false;
        if let Some(store) = &self.backups {
            let mut keep = HashSet::new();
            for id in self.tree.post_order_ids() {
                let is_obs =
                    self.tree.entry(id).map(|e| e.kind()) == Some(EntryKind::Observation);
                if is_obs {
                    if let Some(obs_path) = self.tree.path_of(id) {
                        keep.insert(obs_path);
                    }
                }
            }
            store.retain(&keep);
        }
    }

    /// Ask an in-progress configuration load to stop at its next step.
    pub fn request_config_stop(&mut self) {
        if self.config_session {
            self.config_stop = true;
        }
    }

    pub fn config_stop_requested(&self) -> bool {
        self.config_stop
    }

    // ---- backups ----

    fn save_backup(&mut self, id: EntryId, buffer: &[Rc<Sample>]) {
        let Some(store) = &self.backups else { return };
        let Some(obs_path) = self.tree.path_of(id) else { return };
        if let Err(err) = store.save(&obs_path, buffer) {
            tracing::warn!(observation = obs_path, error = %err, "buffer backup failed");
        }
    }

    fn maybe_restore_backup(&mut self, id: EntryId) {
        let Some(store) = self.backups.clone() else { return };
        let Some(obs_path) = self.tree.path_of(id) else { return };
        let Some(obs) = self
            .tree
            .entry_mut(id)
            .and_then(|e| e.resource_mut())
            .and_then(|r| r.observation_mut())
        else {
            return;
        };
        if obs.backup_period() == 0 || obs.buffer_max_count() == 0 || !obs.buffer().is_empty() {
            return;
        }
        match store.load(&obs_path) {
            Ok(samples) => {
                tracing::debug!(
                    observation = obs_path,
                    count = samples.len(),
                    "restored buffer backup"
                );
                obs.restore_buffer(samples);
            }
            Err(Error::NotFound) => {}
            Err(err) => {
                tracing::warn!(observation = obs_path, error = %err, "backup restore failed");
            }
        }
    }

    // ---- producer/consumer surface plumbing ----

    pub(crate) fn create_io_at(
        &mut self,
        abs_path: &str,
        output: bool,
        data_type: DataType,
        units: &str,
    ) -> Result<EntryId> {
        let root = self.tree.root();
        let (id, released) = if output {
            self.tree.get_output(root, abs_path, data_type, units)?
        } else {
            self.tree.get_input(root, abs_path, data_type, units)?
        };
        self.handlers.release_all(&released);

        // A default migrated from a Placeholder becomes the first value.
        let push_default = self
            .tree
            .entry(id)
            .and_then(|e| e.resource())
            .filter(|r| r.current().is_none())
            .and_then(|r| r.default_value())
            .filter(|(default_type, _)| *default_type == data_type)
            .map(|(_, sample)| sample.clone());
        if let Some(sample) = push_default {
            let _ = self.push_sample(id, sample);
        }
        Ok(id)
    }

    pub(crate) fn delete_io_at(&mut self, abs_path: &str) -> Result<()> {
        let id = self.resolve(abs_path)?;
        let released = self.tree.delete_io(id)?;
        self.handlers.release_all(&released);
        Ok(())
    }

    pub(crate) fn entry_at(&self, abs_path: &str) -> Result<EntryId> {
        self.resolve(abs_path)
    }
}

impl Default for DataHub {
    fn default() -> Self {
        DataHub::new()
    }
}
