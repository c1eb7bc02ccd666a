//! JSON member extraction for observations.
//!
//! An extraction spec selects one location inside a JSON document using
//! dot-separated member names and `[idx]` array indices, e.g. `devs[0].dev`
//! or `[3].x`.

use crate::error::{Error, Result};
use sample::Value;

/// Maximum byte length of an extraction spec.
pub const MAX_EXTRACTION_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Member(String),
    Index(usize),
}

/// A parsed extraction spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    spec: String,
    tokens: Vec<Token>,
}

impl Extraction {
    /// Parse a spec. Fails with `BadParameter` on empty specs, empty
    /// members, unterminated or non-numeric indices.
    pub fn parse(spec: &str) -> Result<Extraction> {
        if spec.is_empty() {
            return Err(Error::bad_parameter("empty extraction spec"));
        }
        if spec.len() > MAX_EXTRACTION_LEN {
            return Err(Error::bad_parameter("extraction spec is too long"));
        }

        let mut tokens = Vec::new();
        let mut rest = spec;

        while !rest.is_empty() {
            if let Some(tail) = rest.strip_prefix('[') {
                let Some(end) = tail.find(']') else {
                    return Err(Error::bad_parameter("unterminated array index"));
                };
                let index: usize = tail[..end]
                    .parse()
                    .map_err(|_| Error::bad_parameter("array index is not a number"))?;
                tokens.push(Token::Index(index));
                rest = &tail[end + 1..];
            } else {
                // A member that follows another token needs a '.' separator.
                // Only the very first token may begin without one.
                if !tokens.is_empty() {
                    rest = rest.strip_prefix('.').ok_or_else(|| {
                        Error::bad_parameter("expected '.' or '[' in extraction spec")
                    })?;
                }
                let end = rest.find(|c| c == '.' || c == '[').unwrap_or(rest.len());
                if end == 0 {
                    return Err(Error::bad_parameter("empty member name in extraction spec"));
                }
                tokens.push(Token::Member(rest[..end].to_string()));
                rest = &rest[end..];
            }
        }

        Ok(Extraction {
            spec: spec.to_string(),
            tokens,
        })
    }

    /// The original spec text.
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Resolve the spec against a document. `None` when the path misses.
    pub fn query<'v>(&self, doc: &'v serde_json::Value) -> Option<&'v serde_json::Value> {
        let mut node = doc;
        for token in &self.tokens {
            node = match token {
                Token::Member(name) => node.as_object()?.get(name)?,
                Token::Index(index) => node.as_array()?.get(*index)?,
            };
        }
        Some(node)
    }
}

/// Narrow an extracted node to the narrowest sample value: booleans,
/// numbers, and strings become typed samples; everything else stays JSON.
pub fn narrow(node: &serde_json::Value) -> Value {
    match node {
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(n) => Value::Numeric(n),
            None => Value::Json(node.clone()),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        _ => Value::Json(node.clone()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_forms() {
        assert!(Extraction::parse("z").is_ok());
        assert!(Extraction::parse("devs[0].dev").is_ok());
        assert!(Extraction::parse("[3]").is_ok());
        assert!(Extraction::parse("[3].x").is_ok());
        assert!(Extraction::parse("a.b.c").is_ok());
        assert!(Extraction::parse("a[1][2]").is_ok());

        assert!(Extraction::parse("").is_err());
        assert!(Extraction::parse(".a").is_err());
        assert!(Extraction::parse("a.").is_err());
        assert!(Extraction::parse("a..b").is_err());
        assert!(Extraction::parse("a[x]").is_err());
        assert!(Extraction::parse("a[1").is_err());
        assert!(Extraction::parse("a.[0]").is_err());
    }

    #[test]
    fn query_members_and_indices() {
        let doc = json!({
            "devs": [{"dev": "UART1", "timeout": 0.5}],
            "baud": "19200",
            "flags": {"on": true},
        });

        let q = |spec: &str| Extraction::parse(spec).unwrap().query(&doc).cloned();

        assert_eq!(q("baud"), Some(json!("19200")));
        assert_eq!(q("devs[0].dev"), Some(json!("UART1")));
        assert_eq!(q("devs[0].timeout"), Some(json!(0.5)));
        assert_eq!(q("flags.on"), Some(json!(true)));
        assert_eq!(q("devs"), Some(json!([{"dev": "UART1", "timeout": 0.5}])));

        assert_eq!(q("missing"), None);
        assert_eq!(q("devs[1]"), None);
        assert_eq!(q("baud[0]"), None);
        assert_eq!(q("devs[0].dev.x"), None);
    }

    #[test]
    fn narrowing() {
        assert_eq!(narrow(&json!(true)), Value::Boolean(true));
        assert_eq!(narrow(&json!(2.5)), Value::Numeric(2.5));
        assert_eq!(narrow(&json!("s")), Value::String("s".into()));
        assert_eq!(narrow(&json!([1])), Value::Json(json!([1])));
        assert_eq!(narrow(&json!(null)), Value::Json(json!(null)));
    }
}
