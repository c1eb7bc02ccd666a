//! End-to-end scenarios over the hub facade.

use std::cell::RefCell;
use std::rc::Rc;

use sample::{DataType, Value};
use serde_json::json;

use crate::destination::DestinationEvent;
use crate::error::Error;
use crate::handler::Callback;
use crate::hub::DataHub;
use crate::io::IoSession;
use crate::obs::Transform;
use crate::tree::EntryKind;
use crate::BackupStore;

type Events = Rc<RefCell<Vec<DestinationEvent>>>;

fn record_destination(hub: &mut DataHub, name: &str) -> Events {
    let events: Events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    hub.add_destination_handler(
        name,
        Rc::new(move |_hub, event| sink.borrow_mut().push(event.clone())),
    )
    .unwrap();
    events
}

#[test]
fn basic_push_through() {
    let mut hub = DataHub::new();
    let app = IoSession::new("p").unwrap();
    app.create_input(&mut hub, "t", DataType::Numeric, "degC")
        .unwrap();

    hub.create_obs("o").unwrap();
    hub.set_source("/obs/o", "/app/p/t").unwrap();
    hub.set_destination("o", "dest1").unwrap();
    let events = record_destination(&mut hub, "dest1");

    app.push_numeric(&mut hub, "t", 1.0, 21.5).unwrap();

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.obs_name, "o");
    assert_eq!(event.src_path, "/app/p/t");
    assert_eq!(event.data_type, DataType::Numeric);
    assert_eq!(event.numeric_value, 21.5);
    assert_eq!(event.timestamp, 1.0);
}

#[test]
fn change_by_drops_between_deliveries() {
    let mut hub = DataHub::new();
    let app = IoSession::new("p").unwrap();
    app.create_input(&mut hub, "t", DataType::Numeric, "")
        .unwrap();
    hub.create_obs("o").unwrap();
    hub.set_source("/obs/o", "/app/p/t").unwrap();
    hub.set_destination("o", "dest1").unwrap();
    hub.set_change_by("o", 1.0).unwrap();
    let events = record_destination(&mut hub, "dest1");

    for (i, v) in [21.5, 22.0, 22.6, 23.7].iter().enumerate() {
        app.push_numeric(&mut hub, "t", 1.0 + i as f64, *v).unwrap();
    }

    let got: Vec<f64> = events.borrow().iter().map(|e| e.numeric_value).collect();
    assert_eq!(got, vec![21.5, 22.6, 23.7]);
}

#[test]
fn json_extraction_delivers_narrowed_string() {
    let mut hub = DataHub::new();
    let app = IoSession::new("p").unwrap();
    app.create_input(&mut hub, "j", DataType::Json, "").unwrap();
    hub.create_obs("o").unwrap();
    hub.set_source("/obs/o", "/app/p/j").unwrap();
    hub.set_json_extraction("o", "devs[0].dev").unwrap();

    let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    hub.add_push_handler(
        "/obs/o",
        Callback::String(Rc::new(move |_hub, _ts, s| {
            sink.borrow_mut().push(s.to_string())
        })),
    )
    .unwrap();

    app.push_json(
        &mut hub,
        "j",
        1.0,
        r#"{"devs":[{"dev":"UART1"}],"baud":"19200"}"#,
    )
    .unwrap();

    assert_eq!(seen.borrow().as_slice(), &["UART1".to_string()]);
    // The observation adopted the extracted sample's type.
    assert_eq!(hub.data_type("/obs/o").unwrap(), DataType::String);

    // With an extraction configured, the destination source path carries
    // the extraction spec.
    hub.set_destination("o", "dest1").unwrap();
    let events = record_destination(&mut hub, "dest1");
    app.push_json(&mut hub, "j", 2.0, r#"{"devs":[{"dev":"UART2"}]}"#)
        .unwrap();
    assert_eq!(events.borrow()[0].src_path, "/app/p/j/devs[0].dev");
    assert_eq!(events.borrow()[0].string_value, "UART2");
}

#[test]
fn destination_routing_matches_by_name() {
    let mut hub = DataHub::new();
    let app = IoSession::new("p").unwrap();
    app.create_input(&mut hub, "b", DataType::Boolean, "")
        .unwrap();
    hub.create_obs("o").unwrap();
    hub.set_source("/obs/o", "/app/p/b").unwrap();
    hub.set_destination("o", "cloud").unwrap();

    let cloud = record_destination(&mut hub, "cloud");
    app.push_boolean(&mut hub, "b", 1.0, true).unwrap();
    assert_eq!(cloud.borrow().len(), 1);
    assert!(cloud.borrow()[0].bool_value);

    let other = record_destination(&mut hub, "other");
    app.push_boolean(&mut hub, "b", 2.0, false).unwrap();
    assert_eq!(cloud.borrow().len(), 2);
    assert!(other.borrow().is_empty());
}

#[test]
fn default_on_virgin_resource_counts_as_push() {
    let mut hub = DataHub::new();
    hub.set_default("/app/p/t", Value::Numeric(7.0)).unwrap();
    let current = hub.current_value("/app/p/t").unwrap().unwrap();
    assert_eq!(current.as_numeric(), 7.0);

    // With a value present, a new default does not propagate.
    hub.set_default("/app/p/t", Value::Numeric(9.0)).unwrap();
    let current = hub.current_value("/app/p/t").unwrap().unwrap();
    assert_eq!(current.as_numeric(), 7.0);
    assert_eq!(
        hub.default_value("/app/p/t").unwrap().unwrap().1.as_numeric(),
        9.0
    );
}

#[test]
fn override_applies_on_matching_io_type() {
    let mut hub = DataHub::new();
    let app = IoSession::new("p").unwrap();
    app.create_input(&mut hub, "t", DataType::Numeric, "")
        .unwrap();

    hub.set_override("/app/p/t", Value::Numeric(5.0)).unwrap();
    app.push_numeric(&mut hub, "t", 3.0, 1.0).unwrap();
    let current = hub.current_value("/app/p/t").unwrap().unwrap();
    assert_eq!(current.as_numeric(), 5.0);
    assert_eq!(current.timestamp(), 3.0);

    // A mismatched override on an I/O resource is inert.
    hub.set_override("/app/p/t", Value::String("off".into()))
        .unwrap();
    app.push_numeric(&mut hub, "t", 4.0, 2.0).unwrap();
    assert_eq!(
        hub.current_value("/app/p/t").unwrap().unwrap().as_numeric(),
        2.0
    );
}

#[test]
fn override_retypes_dynamic_resources() {
    let mut hub = DataHub::new();
    hub.create_obs("o").unwrap();
    hub.set_override("/obs/o", Value::String("forced".into()))
        .unwrap();
    hub.push("/obs/o", 1.0, Value::Numeric(3.0)).unwrap();
    let current = hub.current_value("/obs/o").unwrap().unwrap();
    assert_eq!(current.as_str(), "forced");
    assert_eq!(hub.data_type("/obs/o").unwrap(), DataType::String);
}

#[test]
fn io_push_coerces_or_drops() {
    let mut hub = DataHub::new();
    let app = IoSession::new("p").unwrap();
    app.create_input(&mut hub, "t", DataType::Numeric, "")
        .unwrap();

    // A parseable string coerces to the input's type.
    app.push_string(&mut hub, "t", 1.0, "21.5").unwrap();
    assert_eq!(
        hub.current_value("/app/p/t").unwrap().unwrap().as_numeric(),
        21.5
    );

    // An unparseable one is dropped with TypeMismatch.
    assert_eq!(
        app.push_string(&mut hub, "t", 2.0, "not a number"),
        Err(Error::TypeMismatch)
    );
    assert_eq!(
        hub.current_value("/app/p/t").unwrap().unwrap().timestamp(),
        1.0
    );
}

#[test]
fn handler_dispatch_converts_for_string_and_json() {
    let mut hub = DataHub::new();
    let app = IoSession::new("p").unwrap();
    app.create_input(&mut hub, "t", DataType::Numeric, "")
        .unwrap();

    let texts: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let jsons: Rc<RefCell<Vec<serde_json::Value>>> = Rc::new(RefCell::new(Vec::new()));
    let bools: Rc<RefCell<Vec<bool>>> = Rc::new(RefCell::new(Vec::new()));

    let sink = texts.clone();
    hub.add_push_handler(
        "/app/p/t",
        Callback::String(Rc::new(move |_h, _ts, s| {
            sink.borrow_mut().push(s.to_string())
        })),
    )
    .unwrap();
    let sink = jsons.clone();
    hub.add_push_handler(
        "/app/p/t",
        Callback::Json(Rc::new(move |_h, _ts, v| sink.borrow_mut().push(v.clone()))),
    )
    .unwrap();
    let sink = bools.clone();
    hub.add_push_handler(
        "/app/p/t",
        Callback::Boolean(Rc::new(move |_h, _ts, b| sink.borrow_mut().push(b))),
    )
    .unwrap();

    app.push_numeric(&mut hub, "t", 1.0, 21.5).unwrap();

    assert_eq!(texts.borrow().as_slice(), &["21.5".to_string()]);
    assert_eq!(jsons.borrow().as_slice(), &[json!(21.5)]);
    // The boolean handler's type matches neither; it is skipped.
    assert!(bools.borrow().is_empty());
}

#[test]
fn oversized_conversions_skip_the_handler() {
    let mut hub = DataHub::new();
    let app = IoSession::new("p").unwrap();
    app.create_input(&mut hub, "j", DataType::Json, "").unwrap();

    let texts: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let jsons: Rc<RefCell<Vec<serde_json::Value>>> = Rc::new(RefCell::new(Vec::new()));

    let sink = texts.clone();
    hub.add_push_handler(
        "/app/p/j",
        Callback::String(Rc::new(move |_h, _ts, s| {
            sink.borrow_mut().push(s.to_string())
        })),
    )
    .unwrap();
    let sink = jsons.clone();
    hub.add_push_handler(
        "/app/p/j",
        Callback::Json(Rc::new(move |_h, _ts, v| sink.borrow_mut().push(v.clone()))),
    )
    .unwrap();

    // The rendered text of this document exceeds the string capacity, so
    // the converting string handler is skipped. The JSON handler's type
    // matches exactly and needs no conversion.
    let huge = format!(r#"{{"blob": "{}"}}"#, "x".repeat(sample::MAX_STRING_LEN + 1));
    app.push_json(&mut hub, "j", 1.0, &huge).unwrap();

    assert!(texts.borrow().is_empty());
    assert_eq!(jsons.borrow().len(), 1);
}

#[test]
fn removed_handlers_reject_stale_refs() {
    let mut hub = DataHub::new();
    let app = IoSession::new("p").unwrap();
    app.create_input(&mut hub, "t", DataType::Numeric, "")
        .unwrap();

    let count = Rc::new(RefCell::new(0usize));
    let sink = count.clone();
    let handler = hub
        .add_push_handler(
            "/app/p/t",
            Callback::Numeric(Rc::new(move |_h, _ts, _v| *sink.borrow_mut() += 1)),
        )
        .unwrap();

    app.push_numeric(&mut hub, "t", 1.0, 1.0).unwrap();
    hub.remove_push_handler(handler).unwrap();
    app.push_numeric(&mut hub, "t", 2.0, 2.0).unwrap();

    assert_eq!(*count.borrow(), 1);
    assert_eq!(hub.remove_push_handler(handler), Err(Error::NotFound));
}

#[test]
fn fan_out_follows_route_insertion_order() {
    let mut hub = DataHub::new();
    let app = IoSession::new("p").unwrap();
    app.create_input(&mut hub, "t", DataType::Numeric, "")
        .unwrap();
    hub.create_obs("first").unwrap();
    hub.create_obs("second").unwrap();
    hub.set_source("/obs/first", "/app/p/t").unwrap();
    hub.set_source("/obs/second", "/app/p/t").unwrap();
    hub.set_destination("first", "d").unwrap();
    hub.set_destination("second", "d").unwrap();

    let events = record_destination(&mut hub, "d");
    app.push_numeric(&mut hub, "t", 1.0, 1.0).unwrap();

    let names: Vec<String> = events.borrow().iter().map(|e| e.obs_name.clone()).collect();
    assert_eq!(names, vec!["first", "second"]);
}

#[test]
fn handlers_may_push_re_entrantly() {
    let mut hub = DataHub::new();
    let app = IoSession::new("p").unwrap();
    app.create_input(&mut hub, "a", DataType::Numeric, "")
        .unwrap();

    hub.add_push_handler(
        "/app/p/a",
        Callback::Numeric(Rc::new(|hub, ts, v| {
            // Mirror every sample onto a second resource, doubled. The
            // inner push completes before the outer one returns.
            let _ = hub.push("/mirror", ts, Value::Numeric(v * 2.0));
        })),
    )
    .unwrap();

    app.push_numeric(&mut hub, "a", 1.0, 21.0).unwrap();
    assert_eq!(
        hub.current_value("/mirror").unwrap().unwrap().as_numeric(),
        42.0
    );
}

#[test]
fn route_to_placeholder_survives_io_registration() {
    let mut hub = DataHub::new();
    hub.create_obs("o").unwrap();
    // Wire the observation into a path that does not exist yet.
    hub.set_source("/app/c/led", "/obs/o").unwrap();
    assert_eq!(hub.entry_kind("/app/c/led").unwrap(), EntryKind::Placeholder);

    // The consumer app then registers the real Output there.
    let consumer = IoSession::new("c").unwrap();
    consumer
        .create_output(&mut hub, "led", DataType::Numeric, "")
        .unwrap();
    assert_eq!(hub.entry_kind("/app/c/led").unwrap(), EntryKind::Output);

    hub.push("/obs/o", 1.0, Value::Numeric(3.5)).unwrap();
    assert_eq!(
        hub.current_value("/app/c/led").unwrap().unwrap().as_numeric(),
        3.5
    );
}

#[test]
fn session_paths_are_confined() {
    let mut hub = DataHub::new();
    let app = IoSession::new("p").unwrap();
    assert!(matches!(
        app.create_input(&mut hub, "/app/other/t", DataType::Numeric, ""),
        Err(Error::BadParameter(_))
    ));
    assert!(app
        .create_input(&mut hub, "/app/p/t", DataType::Numeric, "")
        .is_ok());
}

#[test]
fn source_cycles_are_refused_across_the_facade() {
    let mut hub = DataHub::new();
    hub.set_source("/b", "/a").unwrap();
    hub.set_source("/c", "/b").unwrap();
    assert_eq!(hub.set_source("/a", "/c"), Err(Error::WouldCycle));
    assert_eq!(hub.source_path("/a").unwrap(), None);
}

#[test]
fn trigger_samples_pass_through_observations() {
    let mut hub = DataHub::new();
    let app = IoSession::new("p").unwrap();
    app.create_input(&mut hub, "t", DataType::Trigger, "")
        .unwrap();
    hub.create_obs("o").unwrap();
    hub.set_source("/obs/o", "/app/p/t").unwrap();
    hub.set_destination("o", "d").unwrap();
    // change_by never drops triggers.
    hub.set_change_by("o", 5.0).unwrap();

    let events = record_destination(&mut hub, "d");
    app.push_trigger(&mut hub, "t", 1.0).unwrap();
    app.push_trigger(&mut hub, "t", 2.0).unwrap();

    assert_eq!(events.borrow().len(), 2);
    assert_eq!(events.borrow()[0].data_type, DataType::Trigger);
}

#[test]
fn buffer_backup_round_trips_across_hubs() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut hub = DataHub::with_backup_store(BackupStore::new(dir.path()));
        hub.create_obs("o").unwrap();
        hub.set_buffer_max_count("o", 4).unwrap();
        hub.set_backup_period("o", 1).unwrap();
        hub.push("/obs/o", 1.0, Value::Numeric(21.5)).unwrap();
    }

    // A fresh hub over the same directory restores the buffer once the
    // observation re-enables buffering with backups.
    let mut hub = DataHub::with_backup_store(BackupStore::new(dir.path()));
    hub.create_obs("o").unwrap();
    hub.set_buffer_max_count("o", 4).unwrap();
    hub.set_backup_period("o", 3600).unwrap();
    hub.set_transform("o", Transform::Mean).unwrap();

    hub.push("/obs/o", 2.0, Value::Numeric(2.5)).unwrap();
    // Mean over the restored 21.5 and the new 2.5.
    assert_eq!(
        hub.current_value("/obs/o").unwrap().unwrap().as_numeric(),
        12.0
    );
}

#[test]
fn deleting_an_observation_removes_its_backup() {
    let dir = tempfile::tempdir().unwrap();
    let mut hub = DataHub::with_backup_store(BackupStore::new(dir.path()));
    hub.create_obs("o").unwrap();
    hub.set_buffer_max_count("o", 2).unwrap();
    hub.set_backup_period("o", 1).unwrap();
    hub.push("/obs/o", 1.0, Value::Numeric(1.0)).unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

    hub.delete_obs("o").unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn destination_table_is_fixed_capacity() {
    let mut hub = DataHub::new();
    let refs: Vec<_> = (0..crate::DESTINATION_CAPACITY)
        .map(|i| {
            hub.add_destination_handler(&format!("d{}", i), Rc::new(|_hub, _event| {}))
                .unwrap()
        })
        .collect();
    assert!(matches!(
        hub.add_destination_handler("overflow", Rc::new(|_hub, _event| {})),
        Err(Error::NoMemory)
    ));

    // Freeing a slot makes room again, and the old handle goes stale.
    hub.remove_destination_handler(refs[0]).unwrap();
    hub.add_destination_handler("again", Rc::new(|_hub, _event| {}))
        .unwrap();
    assert_eq!(hub.remove_destination_handler(refs[0]), Err(Error::NotFound));
}

#[test]
fn config_session_is_exclusive() {
    let mut hub = DataHub::new();
    hub.begin_config_session().unwrap();
    assert_eq!(hub.begin_config_session(), Err(Error::Busy));
    hub.end_config_session();
    hub.begin_config_session().unwrap();
    hub.end_config_session();
}
