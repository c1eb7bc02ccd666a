//! Exercises the destination-handler path: four observations, four
//! destinations, one push each.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::bail;
use datahub::{DataHub, DestinationEvent, IoSession};
use sample::DataType;

const UART_CONFIG: &str = r#"{
    "devs": [{"dev": "UART1", "timeout": 0.5}],
    "baud": "19200",
    "databits": "8"
}"#;

type Events = Rc<RefCell<Vec<DestinationEvent>>>;

fn record(hub: &mut DataHub, name: &str) -> anyhow::Result<Events> {
    let events: Events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    hub.add_destination_handler(
        name,
        Rc::new(move |_hub, event| sink.borrow_mut().push(event.clone())),
    )?;
    Ok(events)
}

pub fn run() -> anyhow::Result<()> {
    let mut hub = DataHub::new();
    let app = IoSession::new("configTest")?;

    app.create_input(&mut hub, "resource1/value", DataType::Boolean, "")?;
    app.create_input(&mut hub, "resource2/value", DataType::Numeric, "")?;
    app.create_input(&mut hub, "resource3/value", DataType::String, "")?;
    app.create_input(&mut hub, "resource4/value", DataType::Json, "")?;

    for (obs, resource, dest) in [
        ("obs1", "/app/configTest/resource1/value", "destination1"),
        ("obs2", "/app/configTest/resource2/value", "destination2"),
        ("obs3", "/app/configTest/resource3/value", "destination3"),
        ("obs4", "/app/configTest/resource4/value", "destination4"),
    ] {
        hub.create_obs(obs)?;
        hub.set_source(&format!("/obs/{obs}"), resource)?;
        hub.set_destination(obs, dest)?;
    }
    hub.set_json_extraction("obs4", "baud")?;

    let d1 = record(&mut hub, "destination1")?;
    let d2 = record(&mut hub, "destination2")?;
    let d3 = record(&mut hub, "destination3")?;
    let d4 = record(&mut hub, "destination4")?;

    app.push_boolean(&mut hub, "resource1/value", 1.0, true)?;
    app.push_numeric(&mut hub, "resource2/value", 2.0, 12345.6789)?;
    app.push_string(&mut hub, "resource3/value", 3.0, "Destination Test String")?;
    app.push_json(&mut hub, "resource4/value", 4.0, UART_CONFIG)?;

    // One delivery per destination, with the typed payload in the right
    // field and the source path identifying where it came from.
    let b = d1.borrow();
    match b.as_slice() {
        [event]
            if event.obs_name == "obs1"
                && event.src_path == "/app/configTest/resource1/value"
                && event.bool_value =>
        {
            ()
        }
        other => bail!("destination1: unexpected events {:?}", other),
    }

    let b = d2.borrow();
    match b.as_slice() {
        [event] if event.numeric_value == 12345.6789 && event.timestamp == 2.0 => (),
        other => bail!("destination2: unexpected events {:?}", other),
    }

    let b = d3.borrow();
    match b.as_slice() {
        [event] if event.string_value == "Destination Test String" => (),
        other => bail!("destination3: unexpected events {:?}", other),
    }

    // The JSON observation extracts "baud" and reports the extraction in
    // its source path.
    let b = d4.borrow();
    match b.as_slice() {
        [event]
            if event.string_value == "19200"
                && event.src_path == "/app/configTest/resource4/value/baud" =>
        {
            ()
        }
        other => bail!("destination4: unexpected events {:?}", other),
    }

    println!("destination routing ok (4 deliveries)");
    Ok(())
}
