//! The config-load test matrix, driven over fixture files in `configs/`.

use std::path::PathBuf;

use anyhow::{bail, Context};
use datahub::{DataHub, Error, IoSession};
use sample::DataType;

/// What a load is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    /// `load` itself fails with this immediate error.
    LoadError(ImmediateError),
    /// `load` succeeds and the outcome is clean.
    Ok,
    /// `load` succeeds and the outcome is a validation format error.
    FormatError,
    /// `load` succeeds and the outcome is a validation parameter error.
    BadParameter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImmediateError {
    NotFound,
    Unsupported,
}

struct Case {
    file: &'static str,
    format: &'static str,
    expect: Expect,
}

const fn case(file: &'static str, format: &'static str, expect: Expect) -> Case {
    Case {
        file,
        format,
        expect,
    }
}

/// Each test case is a sequence of loads applied to one hub.
const CASES: &[&[Case]] = &[
    &[case(
        "nonExistingConfig.json",
        "json",
        Expect::LoadError(ImmediateError::NotFound),
    )],
    &[case(
        "validConfig1.cbor",
        "cbor",
        Expect::LoadError(ImmediateError::Unsupported),
    )],
    &[case("validConfig1.json", "json", Expect::Ok)],
    &[case("wrongFromatConfig1.json", "json", Expect::FormatError)],
    &[case("wrongFromatConfig2.json", "json", Expect::FormatError)],
    &[case("wrongFromatConfig3.json", "json", Expect::FormatError)],
    &[case("wrongFromatConfig4.json", "json", Expect::FormatError)],
    &[case("wrongFromatConfig5.json", "json", Expect::FormatError)],
    &[case("wrongParameterConfig1.json", "json", Expect::BadParameter)],
    &[case("wrongParameterConfig2.json", "json", Expect::BadParameter)],
    &[case("wrongParameterConfig3.json", "json", Expect::BadParameter)],
    &[
        case("validConfig1.json", "json", Expect::Ok),
        case("wrongFromatConfig1.json", "json", Expect::FormatError),
    ],
    &[
        case("validConfig1.json", "json", Expect::Ok),
        case("wrongParameterConfig2.json", "json", Expect::BadParameter),
    ],
];

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("configs")
}

/// Fill the hub with resources the valid fixture wires into.
fn fill_datahub(hub: &mut DataHub) -> anyhow::Result<()> {
    let app = IoSession::new("configTest")?;
    app.create_input(hub, "myresources/nums/this", DataType::Numeric, "k")?;
    app.create_input(hub, "myresources/json/this", DataType::Json, "")?;
    app.create_input(hub, "myresources/strs/this", DataType::String, "s")?;

    app.push_numeric(hub, "myresources/nums/this", 0.0, 1.5)?;
    app.push_json(hub, "myresources/json/this", 0.0, r#"{"key": 2}"#)?;
    app.push_string(hub, "myresources/strs/this", 0.0, "a string")?;

    hub.create_obs("prebuiltobs")?;
    hub.set_source("/obs/prebuiltobs", "/app/configTest/myresources/nums/this")?;
    Ok(())
}

pub fn run(datahub: u8, config: usize) -> anyhow::Result<()> {
    let Some(cases) = CASES.get(config) else {
        bail!("no test case {} (have {})", config, CASES.len());
    };

    let mut hub = DataHub::new();
    if datahub == 1 {
        fill_datahub(&mut hub).context("pre-populating the hub")?;
    }

    for case in cases.iter() {
        let file = fixture_dir().join(case.file);
        tracing::info!(file = case.file, format = case.format, "loading config");

        match datahub_config::load(&mut hub, &file, case.format) {
            Err(err) => {
                let expected = match case.expect {
                    Expect::LoadError(ImmediateError::NotFound) => err == Error::NotFound,
                    Expect::LoadError(ImmediateError::Unsupported) => err == Error::Unsupported,
                    _ => false,
                };
                if !expected {
                    bail!("{}: unexpected load error: {}", case.file, err);
                }
            }
            Ok(outcome) => {
                let matched = match (&case.expect, &outcome.result) {
                    (Expect::Ok, Ok(())) => true,
                    (Expect::FormatError, Err(Error::FormatError(_))) => true,
                    (Expect::BadParameter, Err(Error::BadParameter(_))) => true,
                    _ => false,
                };
                if !matched {
                    bail!(
                        "{}: expected {:?}, got {:?} at byte {}",
                        case.file,
                        case.expect,
                        outcome.result,
                        outcome.byte_offset
                    );
                }
            }
        }
    }

    println!("parser case {} ok ({} loads)", config, cases.len());
    Ok(())
}
