//! Declarative configuration loading for the data hub.
//!
//! A config file is applied in two phases over the same document: a
//! validate pass that touches nothing, then an apply pass that creates and
//! updates config-managed observations and seeds resource states. After a
//! successful apply, a relevance sweep garbage-collects config-managed
//! observations the new document no longer mentions. A failed apply rolls
//! back by sweeping *every* config-managed observation: settings may have
//! been partially mutated, so the previous set cannot be restored.

use std::path::Path;

use datahub::{DataHub, Error};

mod apply;
mod validate;

pub use apply::ApplyError;
pub use validate::Violation;

/// The terminal result of one configuration load.
#[derive(Debug)]
pub struct LoadOutcome {
    /// `Ok` on success; otherwise the validation error (specific kind) or
    /// `Fault` for apply-phase failures.
    pub result: Result<(), Error>,
    /// Approximate byte offset of the offending document location.
    pub byte_offset: usize,
}

impl LoadOutcome {
    fn ok() -> LoadOutcome {
        LoadOutcome {
            result: Ok(()),
            byte_offset: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Load a configuration file into the hub.
///
/// Returns an immediate error for an unsupported encoding (`Unsupported`),
/// a missing or unreadable file (`NotFound`/`IoError`), or a load already
/// in progress (`Busy`). Validation and apply results are reported through
/// the returned outcome.
pub fn load(
    hub: &mut DataHub,
    file_path: impl AsRef<Path>,
    encoding: &str,
) -> Result<LoadOutcome, Error> {
    if encoding != "json" {
        return Err(Error::Unsupported);
    }
    let text = std::fs::read_to_string(file_path.as_ref())?;
    load_str(hub, &text)
}

/// Load a configuration document held in memory. Same contract as `load`,
/// minus the file handling.
pub fn load_str(hub: &mut DataHub, text: &str) -> Result<LoadOutcome, Error> {
    hub.begin_config_session()?;
    let outcome = run(hub, text);
    hub.end_config_session();
    Ok(outcome)
}

fn run(hub: &mut DataHub, text: &str) -> LoadOutcome {
    if let Err(violation) = validate::validate(text) {
        tracing::error!(
            offset = violation.byte_offset,
            error = %violation.kind,
            "config validation failed"
        );
        return LoadOutcome {
            result: Err(violation.kind),
            byte_offset: violation.byte_offset,
        };
    }

    tracing::info!("config is valid, applying");

    if let Err(err) = apply::apply(hub, text) {
        tracing::error!(offset = err.byte_offset, message = err.message, "config apply failed");
        // Rollback: every config-managed observation goes, relevant or not.
        sweep(hub, false);
        return LoadOutcome {
            // Apply failures surface as one coarse kind; the specific
            // cause is in the message.
            result: Err(Error::Fault(err.message)),
            byte_offset: err.byte_offset,
        };
    }

    // Config-managed observations the document did not mention are stale.
    sweep(hub, true);
    tracing::info!("config applied");
    LoadOutcome::ok()
}

/// Post-order sweep of config-managed observations. With
/// `consider_relevance`, only irrelevant ones are deleted; without it, all
/// of them are (the rollback path). Relevance flags are cleared either way.
fn sweep(hub: &mut DataHub, consider_relevance: bool) {
    for id in hub.post_order_entries() {
        if hub.entry_kind_of(id) != Some(datahub::EntryKind::Observation) {
            continue;
        }
        if hub.observation_is_config_managed(id)
            && (!consider_relevance || !hub.observation_is_relevant(id))
        {
            let _ = hub.delete_observation_by_id(id);
        }
    }
    for id in hub.post_order_entries() {
        if hub.entry_kind_of(id) == Some(datahub::EntryKind::Observation) {
            hub.set_observation_relevance(id, false);
        }
    }
}
