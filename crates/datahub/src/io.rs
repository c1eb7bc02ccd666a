//! The producer/consumer app surface.
//!
//! Each connected app gets an `IoSession` bound to its identity. Every
//! resource the session touches lives under `/app/<app>/…`; attempts to
//! address anything else are rejected.

use sample::{DataType, Value};

use crate::error::{Error, Result};
use crate::handler::{Callback, HandlerRef};
use crate::hub::DataHub;
use crate::path;
use crate::resource::MAX_UNITS_LEN;
use crate::tree::EntryKind;

/// An app's identity on the hub. Derived from the connection by the
/// out-of-scope transport; here it is constructed directly.
#[derive(Debug, Clone)]
pub struct IoSession {
    app: String,
}

impl IoSession {
    pub fn new(app: &str) -> Result<IoSession> {
        path::check_segment(app)?;
        Ok(IoSession {
            app: app.to_string(),
        })
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    /// Map a session path to its absolute form, confining it to the app's
    /// namespace. Accepts both relative paths and already-absolute paths
    /// under `/app/<app>/`.
    fn absolute(&self, path_str: &str) -> Result<String> {
        if path_str.starts_with('/') {
            path::check_absolute(path_str)?;
            let prefix = format!("/app/{}/", self.app);
            if !path_str.starts_with(&prefix) {
                return Err(Error::bad_parameter("path escapes the app namespace"));
            }
            Ok(path_str.to_string())
        } else {
            path::check_relative(path_str)?;
            Ok(format!("/app/{}/{}", self.app, path_str))
        }
    }

    pub fn create_input(
        &self,
        hub: &mut DataHub,
        path_str: &str,
        data_type: DataType,
        units: &str,
    ) -> Result<()> {
        check_units(units)?;
        let abs = self.absolute(path_str)?;
        hub.create_io_at(&abs, false, data_type, units)?;
        Ok(())
    }

    pub fn create_output(
        &self,
        hub: &mut DataHub,
        path_str: &str,
        data_type: DataType,
        units: &str,
    ) -> Result<()> {
        check_units(units)?;
        let abs = self.absolute(path_str)?;
        hub.create_io_at(&abs, true, data_type, units)?;
        Ok(())
    }

    /// Delete an Input or Output. The entry lingers as a Placeholder when
    /// administrative settings or routes still refer to it.
    pub fn delete_resource(&self, hub: &mut DataHub, path_str: &str) -> Result<()> {
        let abs = self.absolute(path_str)?;
        hub.delete_io_at(&abs)
    }

    /// Push to one of this app's resources. Unlike the admin surface, the
    /// resource must already exist.
    pub fn push(
        &self,
        hub: &mut DataHub,
        path_str: &str,
        timestamp: f64,
        value: Value,
    ) -> Result<()> {
        let abs = self.absolute(path_str)?;
        let id = hub.entry_at(&abs)?;
        hub.push_sample(id, std::rc::Rc::new(sample::Sample::new(timestamp, value)))
    }

    pub fn push_trigger(&self, hub: &mut DataHub, path_str: &str, timestamp: f64) -> Result<()> {
        self.push(hub, path_str, timestamp, Value::Trigger)
    }

    pub fn push_boolean(
        &self,
        hub: &mut DataHub,
        path_str: &str,
        timestamp: f64,
        value: bool,
    ) -> Result<()> {
        self.push(hub, path_str, timestamp, Value::Boolean(value))
    }

    pub fn push_numeric(
        &self,
        hub: &mut DataHub,
        path_str: &str,
        timestamp: f64,
        value: f64,
    ) -> Result<()> {
        self.push(hub, path_str, timestamp, Value::Numeric(value))
    }

    pub fn push_string(
        &self,
        hub: &mut DataHub,
        path_str: &str,
        timestamp: f64,
        value: &str,
    ) -> Result<()> {
        self.push(hub, path_str, timestamp, Value::String(value.to_string()))
    }

    pub fn push_json(
        &self,
        hub: &mut DataHub,
        path_str: &str,
        timestamp: f64,
        json_text: &str,
    ) -> Result<()> {
        let value: serde_json::Value = serde_json::from_str(json_text)
            .map_err(|err| Error::FormatError(err.to_string()))?;
        self.push(hub, path_str, timestamp, Value::Json(value))
    }

    pub fn add_push_handler(
        &self,
        hub: &mut DataHub,
        path_str: &str,
        callback: Callback,
    ) -> Result<HandlerRef> {
        let abs = self.absolute(path_str)?;
        if hub.entry_kind(&abs)? == EntryKind::Namespace {
            return Err(Error::NotFound);
        }
        let id = hub.entry_at(&abs)?;
        Ok(hub.add_handler_to(id, callback))
    }

    pub fn remove_push_handler(&self, hub: &mut DataHub, handler: HandlerRef) -> Result<()> {
        hub.remove_push_handler(handler)
    }
}

fn check_units(units: &str) -> Result<()> {
    if units.len() > MAX_UNITS_LEN {
        return Err(Error::bad_parameter(format!(
            "units string longer than {} bytes",
            MAX_UNITS_LEN
        )));
    }
    Ok(())
}
