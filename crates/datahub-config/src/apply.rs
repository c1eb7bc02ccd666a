//! The apply phase: mutate the tree per a validated document.

use datahub::{DataHub, Transform};
use sample::Value;

use crate::validate::key_offset;

/// An apply-phase failure. Reported to callers as `Fault` after rollback.
#[derive(Debug)]
pub struct ApplyError {
    pub message: String,
    pub byte_offset: usize,
}

fn fail(message: impl Into<String>, byte_offset: usize) -> ApplyError {
    ApplyError {
        message: message.into(),
        byte_offset,
    }
}

/// Apply a validated document. On error the caller rolls back by sweeping
/// all config-managed observations.
pub fn apply(hub: &mut DataHub, text: &str) -> Result<(), ApplyError> {
    let doc: serde_json::Value =
        serde_json::from_str(text).map_err(|err| fail(err.to_string(), 0))?;

    // Start from a clean slate of relevance flags.
    for id in hub.post_order_entries() {
        if hub.entry_kind_of(id) == Some(datahub::EntryKind::Observation) {
            hub.set_observation_relevance(id, false);
        }
    }

    if let Some(observations) = doc.get("o").and_then(|v| v.as_object()) {
        for (name, body) in observations {
            if hub.config_stop_requested() {
                return Err(fail("load stopped by caller", key_offset(text, name)));
            }
            apply_observation(hub, text, name, body)?;
        }
    }

    if let Some(states) = doc.get("s").and_then(|v| v.as_object()) {
        for (state_path, body) in states {
            if hub.config_stop_requested() {
                return Err(fail("load stopped by caller", key_offset(text, state_path)));
            }
            apply_state(hub, state_path, body);
        }
    }

    Ok(())
}

fn apply_observation(
    hub: &mut DataHub,
    text: &str,
    name: &str,
    body: &serde_json::Value,
) -> Result<(), ApplyError> {
    let at = key_offset(text, name);
    let body = body.as_object().expect("validated observation body");

    // An observation created by this load becomes config-managed and thus
    // eligible for the relevance sweep; a pre-existing one keeps its
    // provenance but still gets its absent fields reset below.
    let existed = hub.find_observation(name).is_ok();
    hub.create_obs(name)
        .map_err(|err| fail(format!("error creating observation {}: {}", name, err), at))?;
    let id = hub
        .find_observation(name)
        .expect("observation exists after create");
    hub.set_observation_relevance(id, true);
    if !existed {
        hub.mark_observation_config_managed(id);
    }

    let obs_path = format!("/obs/{}", name);

    let resource = body
        .get("r")
        .and_then(|v| v.as_str())
        .expect("validated mandatory r");
    hub.set_source(&obs_path, resource).map_err(|err| {
        fail(
            format!("failed to set source for obs {}: {}", name, err),
            at,
        )
    })?;

    // A destination beginning with '/' names a tree resource: the
    // observation becomes that resource's data source. Anything else is a
    // symbolic destination name for the registry.
    let destination = body
        .get("d")
        .and_then(|v| v.as_str())
        .expect("validated mandatory d");
    if destination.starts_with('/') {
        hub.set_source(destination, &obs_path).map_err(|err| {
            fail(
                format!("failed to set destination for obs {}: {}", name, err),
                at,
            )
        })?;
    } else {
        hub.set_destination(name, destination).map_err(|err| {
            fail(
                format!("failed to set destination for obs {}: {}", name, err),
                at,
            )
        })?;
    }

    // Optional fields. Present: apply. Absent on a pre-existing
    // observation: reset to the unset value. Note the filter naming flip:
    // "lt" (accept lower-than) is the high limit, "gt" the low limit.
    let number = |field: &str| body.get(field).and_then(|v| v.as_f64());

    let set = |label: &str, result: datahub::Result<()>| {
        result.map_err(|err| {
            fail(
                format!("failed to set {} for obs {}: {}", label, name, err),
                at,
            )
        })
    };

    if let Some(period) = number("p") {
        set("min period", hub.set_min_period(name, period))?;
    } else if existed {
        set("min period", hub.set_min_period(name, f64::NAN))?;
    }

    if let Some(change_by) = number("st") {
        set("change-by", hub.set_change_by(name, change_by))?;
    } else if existed {
        set("change-by", hub.set_change_by(name, f64::NAN))?;
    }

    if let Some(lower_than) = number("lt") {
        set("high limit", hub.set_high_limit(name, lower_than))?;
    } else if existed {
        set("high limit", hub.set_high_limit(name, f64::NAN))?;
    }

    if let Some(greater_than) = number("gt") {
        set("low limit", hub.set_low_limit(name, greater_than))?;
    } else if existed {
        set("low limit", hub.set_low_limit(name, f64::NAN))?;
    }

    if let Some(count) = number("b") {
        set(
            "buffer count",
            hub.set_buffer_max_count(name, count as u32),
        )?;
    } else if existed {
        set("buffer count", hub.set_buffer_max_count(name, 0))?;
    }

    if let Some(function) = body.get("f").and_then(|v| v.as_str()) {
        // Unknown transform names deliberately fall back to None.
        set("transform", hub.set_transform(name, Transform::from_name(function)))?;
    } else if existed {
        set("transform", hub.set_transform(name, Transform::None))?;
    }

    if let Some(spec) = body.get("s").and_then(|v| v.as_str()) {
        set("JSON extraction", hub.set_json_extraction(name, spec))?;
    } else if existed {
        set("JSON extraction", hub.set_json_extraction(name, ""))?;
    }

    Ok(())
}

/// Seed one state: set the resource's default and push the value. A state
/// is a best-effort seed, so failures are logged and ignored.
fn apply_state(hub: &mut DataHub, state_path: &str, body: &serde_json::Value) {
    let body = body.as_object().expect("validated state body");
    let wants_json = body.get("dt").and_then(|v| v.as_str()) == Some("json");

    let value = match body.get("v").expect("validated mandatory v") {
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(n) => Value::Numeric(n),
            None => return,
        },
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::String(s) if wants_json => match serde_json::from_str(s) {
            Ok(parsed) => Value::Json(parsed),
            Err(err) => {
                tracing::warn!(state = state_path, error = %err, "state JSON does not parse");
                return;
            }
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        _ => return,
    };

    if let Err(err) = hub.set_default(state_path, value.clone()) {
        tracing::warn!(state = state_path, error = %err, "state default was not set");
        return;
    }
    if let Err(err) = hub.push(state_path, 0.0, value) {
        tracing::warn!(state = state_path, error = %err, "state push failed");
    }
}
