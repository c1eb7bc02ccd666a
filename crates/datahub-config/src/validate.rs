//! The validate phase: full schema walk with no tree mutation.

use datahub::extraction::{Extraction, MAX_EXTRACTION_LEN};
use datahub::{path, Error};
use sample::MAX_STRING_LEN;

/// Longest accepted transform name ("stddev").
const MAX_TRANSFORM_LEN: usize = 6;

/// A validation failure: the specific error kind plus where in the raw
/// document it was found.
#[derive(Debug)]
pub struct Violation {
    pub kind: Error,
    pub byte_offset: usize,
}

fn format_error(message: impl Into<String>, byte_offset: usize) -> Violation {
    Violation {
        kind: Error::FormatError(message.into()),
        byte_offset,
    }
}

fn bad_parameter(message: impl Into<String>, byte_offset: usize) -> Violation {
    Violation {
        kind: Error::BadParameter(message.into()),
        byte_offset,
    }
}

/// Check the whole document. Returns the first violation found, with the
/// same precedence the apply walk would hit it in.
pub fn validate(text: &str) -> Result<(), Violation> {
    let doc: serde_json::Value = serde_json::from_str(text).map_err(|err| {
        format_error(
            err.to_string(),
            syntax_offset(text, err.line(), err.column()),
        )
    })?;

    let root = doc
        .as_object()
        .ok_or_else(|| format_error("config root is not an object", 0))?;

    for (key, value) in root {
        let at = key_offset(text, key);
        match key.as_str() {
            "t" => {
                if !(value.is_i64() || value.is_u64()) {
                    return Err(format_error("\"t\" is not an integer", at));
                }
            }
            "v" => {
                if !value.is_string() {
                    return Err(format_error("\"v\" is not a string", at));
                }
            }
            "ts" => {
                if !value.is_number() {
                    return Err(format_error("\"ts\" is not a number", at));
                }
            }
            "o" => validate_observations(text, value)?,
            "s" => validate_states(text, value)?,
            // Unknown root members are ignored.
            _ => {}
        }
    }
    Ok(())
}

fn validate_observations(text: &str, value: &serde_json::Value) -> Result<(), Violation> {
    let map = value
        .as_object()
        .ok_or_else(|| format_error("\"o\" is not an object", key_offset(text, "o")))?;

    for (name, body) in map {
        let at = key_offset(text, name);
        if path::check_relative(name).is_err() {
            return Err(bad_parameter("observation name is invalid", at));
        }
        let body = body.as_object().ok_or_else(|| {
            format_error(format!("observation {} is not an object", name), at)
        })?;

        let mut have_resource = false;
        let mut have_destination = false;
        for (field, field_value) in body {
            let field_at = key_offset(text, name);
            match field.as_str() {
                "r" => {
                    let Some(resource) = field_value.as_str() else {
                        return Err(format_error("\"r\" is not a string", field_at));
                    };
                    if path::check_absolute(resource).is_err() {
                        return Err(bad_parameter(
                            format!("source path for observation {} is invalid", name),
                            field_at,
                        ));
                    }
                    have_resource = true;
                }
                "d" => {
                    let Some(destination) = field_value.as_str() else {
                        return Err(format_error("\"d\" is not a string", field_at));
                    };
                    if destination.starts_with('/') {
                        if path::check_absolute(destination).is_err() {
                            return Err(bad_parameter(
                                format!("destination path for observation {} is invalid", name),
                                field_at,
                            ));
                        }
                    } else if destination.is_empty()
                        || destination.len() > path::MAX_PATH_LEN
                    {
                        return Err(bad_parameter(
                            format!("destination name for observation {} is invalid", name),
                            field_at,
                        ));
                    }
                    have_destination = true;
                }
                "p" | "st" | "lt" | "gt" => {
                    if !field_value.is_number() {
                        return Err(format_error(
                            format!("\"{}\" is not a number", field),
                            field_at,
                        ));
                    }
                }
                "b" => {
                    let Some(count) = field_value.as_f64() else {
                        return Err(format_error("\"b\" is not a number", field_at));
                    };
                    if count < 0.0 {
                        return Err(bad_parameter("buffer count is negative", field_at));
                    }
                }
                "f" => {
                    let Some(transform) = field_value.as_str() else {
                        return Err(format_error("\"f\" is not a string", field_at));
                    };
                    if transform.len() > MAX_TRANSFORM_LEN {
                        return Err(bad_parameter("obs transform is invalid", field_at));
                    }
                }
                "s" => {
                    let Some(spec) = field_value.as_str() else {
                        return Err(format_error("\"s\" is not a string", field_at));
                    };
                    if spec.len() > MAX_EXTRACTION_LEN {
                        return Err(bad_parameter("jsonExtraction is too long", field_at));
                    }
                    if !spec.is_empty() && Extraction::parse(spec).is_err() {
                        return Err(bad_parameter("jsonExtraction is invalid", field_at));
                    }
                }
                // Unknown observation members are ignored.
                _ => {}
            }
        }

        if !(have_resource && have_destination) {
            return Err(format_error(
                format!("observation {} did not have both r and d", name),
                at,
            ));
        }
    }
    Ok(())
}

fn validate_states(text: &str, value: &serde_json::Value) -> Result<(), Violation> {
    let map = value
        .as_object()
        .ok_or_else(|| format_error("\"s\" is not an object", key_offset(text, "s")))?;

    for (state_path, body) in map {
        let at = key_offset(text, state_path);
        if path::check_absolute(state_path).is_err() {
            return Err(bad_parameter("state key is invalid", at));
        }
        let body = body
            .as_object()
            .ok_or_else(|| format_error(format!("state {} is not an object", state_path), at))?;

        let mut have_value = false;
        for (field, field_value) in body {
            match field.as_str() {
                "v" => {
                    match field_value {
                        serde_json::Value::Number(_) | serde_json::Value::Bool(_) => {}
                        serde_json::Value::String(s) => {
                            if s.len() > MAX_STRING_LEN {
                                return Err(bad_parameter("string value is too long", at));
                            }
                        }
                        _ => {
                            return Err(format_error(
                                format!("state {} has a non-scalar value", state_path),
                                at,
                            ));
                        }
                    }
                    have_value = true;
                }
                "dt" => {
                    if !field_value.is_string() {
                        return Err(format_error("\"dt\" is not a string", at));
                    }
                    // Any value other than "json" is silently ignored.
                }
                // Unknown state members are ignored.
                _ => {}
            }
        }
        if !have_value {
            return Err(format_error(
                format!("state {} did not have v", state_path),
                at,
            ));
        }
    }
    Ok(())
}

/// Byte offset of a 1-based (line, column) position.
fn syntax_offset(text: &str, line: usize, column: usize) -> usize {
    let mut offset = 0;
    for (n, l) in text.split('\n').enumerate() {
        if n + 1 == line {
            return offset + column.saturating_sub(1);
        }
        offset += l.len() + 1;
    }
    offset
}

/// Best-effort byte offset of a member key in the raw text.
pub(crate) fn key_offset(text: &str, key: &str) -> usize {
    text.find(&format!("\"{}\"", key)).unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accepts_a_full_document() {
        let text = r#"{
            "t": 1, "v": "0.1", "ts": 123.5,
            "o": {
                "temp": {"r": "/app/p/t", "d": "cloud", "p": 0.5, "st": 1.0,
                         "lt": 30.0, "gt": -10.0, "b": 10, "f": "mean",
                         "s": "x.y[0]", "future": true}
            },
            "s": {
                "/app/p/led": {"v": true},
                "/app/p/name": {"v": "boiler"},
                "/app/p/cfg": {"v": "{\"a\":1}", "dt": "json"}
            },
            "ignored": []
        }"#;
        assert!(validate(text).is_ok());
    }

    #[test]
    fn syntax_errors_carry_offsets() {
        let text = "{\n  \"t\": 1,\n  oops\n}";
        let violation = validate(text).unwrap_err();
        assert!(matches!(violation.kind, Error::FormatError(_)));
        assert_eq!(&text[violation.byte_offset..violation.byte_offset + 1], "o");
    }

    #[test]
    fn observation_requires_r_and_d() {
        let text = r#"{"o": {"x": {"r": "/a/b"}}}"#;
        let violation = validate(text).unwrap_err();
        assert!(matches!(violation.kind, Error::FormatError(_)));
        assert_eq!(violation.byte_offset, text.find("\"x\"").unwrap());

        let text = r#"{"o": {"x": {"d": "cloud"}}}"#;
        assert!(validate(text).is_err());

        let text = r#"{"o": {"x": {"r": "/a/b", "d": "cloud"}}}"#;
        assert!(validate(text).is_ok());
    }

    #[test]
    fn bad_paths_are_parameter_errors() {
        for text in [
            r#"{"o": {"/abs": {"r": "/a", "d": "x"}}}"#,
            r#"{"o": {"x": {"r": "not-absolute", "d": "x"}}}"#,
            r#"{"o": {"x": {"r": "/a//b", "d": "x"}}}"#,
            r#"{"s": {"relative": {"v": 1}}}"#,
        ] {
            let violation = validate(text).unwrap_err();
            assert!(
                matches!(violation.kind, Error::BadParameter(_)),
                "text: {}",
                text
            );
        }
    }

    #[test]
    fn field_type_mismatches_are_format_errors() {
        for text in [
            r#"[1, 2]"#,
            r#"{"o": [1]}"#,
            r#"{"o": {"x": {"r": "/a", "d": "x", "p": "fast"}}}"#,
            r#"{"s": {"/a": {"v": [1]}}}"#,
            r#"{"s": {"/a": {}}}"#,
        ] {
            let violation = validate(text).unwrap_err();
            assert!(
                matches!(violation.kind, Error::FormatError(_)),
                "text: {}",
                text
            );
        }
    }

    #[test]
    fn long_transform_and_extraction_are_rejected() {
        let text = r#"{"o": {"x": {"r": "/a", "d": "x", "f": "geomean"}}}"#;
        assert!(matches!(
            validate(text).unwrap_err().kind,
            Error::BadParameter(_)
        ));

        let spec = "a".repeat(MAX_EXTRACTION_LEN + 1);
        let text = format!(r#"{{"o": {{"x": {{"r": "/a", "d": "x", "s": "{}"}}}}}}"#, spec);
        assert!(matches!(
            validate(&text).unwrap_err().kind,
            Error::BadParameter(_)
        ));
    }

    #[test]
    fn unknown_members_are_ignored() {
        let text = r#"{"extra": {"deep": [1]}, "o": {}, "s": {}}"#;
        assert!(validate(text).is_ok());
    }
}
