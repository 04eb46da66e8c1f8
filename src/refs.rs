//! The blueprint reference language: `${infra.x}`, `${var.x}`, `${self.x}`
//! tokens embedded in property values, variable defaults, and `depends_on`
//! entries.
//!
//! The tokenizer produces an explicit AST ([`SpecReference`]) so callers
//! never re-parse strings; resolution goes through a [`ReferenceScope`]
//! supplied by the graph builder (or a test double).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{BlueprintReferenceError, ReferenceCause};

/// Grammar of a single reference token, inside `${…}`.
pub static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(infra|var|self)\.[A-Za-z_\-][A-Za-z0-9_\-\.]*$").expect("reference regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefSource {
    Infra,
    Var,
    SelfScope,
}

impl RefSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefSource::Infra => "infra",
            RefSource::Var => "var",
            RefSource::SelfScope => "self",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "infra" => Some(RefSource::Infra),
            "var" => Some(RefSource::Var),
            "self" => Some(RefSource::SelfScope),
            _ => None,
        }
    }
}

/// A parsed reference token: source plus a non-empty lookup path. The first
/// path segment names the resource/variable; the rest are attribute lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecReference {
    pub source: RefSource,
    pub path: Vec<String>,
}

impl SpecReference {
    pub fn parse(token: &str) -> Result<Self, ReferenceCause> {
        let Some((head, rest)) = token.split_once('.') else {
            return Err(ReferenceCause::MalformedReference);
        };
        let Some(source) = RefSource::parse(head) else {
            return Err(ReferenceCause::UnknownSource);
        };
        // The regex gates segment characters; dangling dots slip through it
        // (`self.x.` matches) and are caught by the empty-segment check.
        if !REFERENCE_RE.is_match(token) {
            return Err(ReferenceCause::MalformedReference);
        }
        let path: Vec<String> = rest.split('.').map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(ReferenceCause::MalformedReference);
        }
        Ok(SpecReference { source, path })
    }

    /// The referenced resource or variable name.
    pub fn name(&self) -> &str {
        &self.path[0]
    }

    /// Attribute lookups past the name.
    pub fn sub_path(&self) -> &[String] {
        &self.path[1..]
    }

    pub fn token(&self) -> String {
        format!("{}.{}", self.source.as_str(), self.path.join("."))
    }
}

/// One piece of an interpolated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Reference(SpecReference),
}

/// Splits a raw string into literal and reference segments. A `${` without a
/// closing `}` is malformed.
pub fn parse_template(input: &str) -> Result<Vec<Segment>, (String, ReferenceCause)> {
    let mut segments = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        if !rest[..start].is_empty() {
            segments.push(Segment::Literal(rest[..start].to_string()));
        }
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err((after.to_string(), ReferenceCause::MalformedReference));
        };
        let token = after[..end].trim();
        let reference =
            SpecReference::parse(token).map_err(|cause| (token.to_string(), cause))?;
        segments.push(Segment::Reference(reference));
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

/// Detects the type-preserving form: the trimmed input is exactly one token.
pub fn as_single_reference(input: &str) -> Option<SpecReference> {
    match parse_template(input.trim()) {
        Ok(segments) => match segments.as_slice() {
            [Segment::Reference(reference)] => Some(reference.clone()),
            _ => None,
        },
        Err(_) => None,
    }
}

/// Lookup environment for reference resolution. `&mut` because `var.*`
/// platform variables materialize lazily on first use.
pub trait ReferenceScope {
    fn lookup(&mut self, reference: &SpecReference) -> Result<Value, ReferenceCause>;
}

/// Resolves a raw string that may contain reference tokens.
///
/// Whole-token values preserve the referenced type; embedded references are
/// coerced to string, rejecting objects and lists with
/// `NonStringInterpolation`.
pub fn resolve_template(
    input: &str,
    path: &str,
    scope: &mut dyn ReferenceScope,
) -> Result<Value, BlueprintReferenceError> {
    let fail = |token: &str, cause: ReferenceCause| BlueprintReferenceError {
        token: token.to_string(),
        path: path.to_string(),
        cause,
    };

    if let Some(reference) = as_single_reference(input) {
        return scope
            .lookup(&reference)
            .map_err(|cause| fail(&reference.token(), cause));
    }

    let segments = parse_template(input).map_err(|(token, cause)| fail(&token, cause))?;
    if segments
        .iter()
        .all(|s| matches!(s, Segment::Literal(_)))
    {
        return Ok(Value::String(input.to_string()));
    }

    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(&text),
            Segment::Reference(reference) => {
                let value = scope
                    .lookup(&reference)
                    .map_err(|cause| fail(&reference.token(), cause))?;
                match value {
                    Value::String(s) => out.push_str(&s),
                    Value::Number(n) => out.push_str(&n.to_string()),
                    Value::Bool(b) => out.push_str(if b { "true" } else { "false" }),
                    Value::Null => out.push_str("null"),
                    Value::Object(_) | Value::Array(_) => {
                        return Err(fail(
                            &reference.token(),
                            ReferenceCause::NonStringInterpolation,
                        ));
                    }
                }
            }
        }
    }
    Ok(Value::String(out))
}

/// Resolves every string inside a JSON value tree, recursing through
/// objects and arrays. `path` names the property for error reporting.
pub fn resolve_value(
    raw: &Value,
    path: &str,
    scope: &mut dyn ReferenceScope,
) -> Result<Value, BlueprintReferenceError> {
    match raw {
        Value::String(s) => resolve_template(s, path, scope),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(resolve_value(item, &format!("{path}[{i}]"), scope)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(
                    key.clone(),
                    resolve_value(value, &format!("{path}.{key}"), scope)?,
                );
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    struct MapScope {
        values: BTreeMap<String, Value>,
    }

    impl ReferenceScope for MapScope {
        fn lookup(&mut self, reference: &SpecReference) -> Result<Value, ReferenceCause> {
            self.values
                .get(&reference.token())
                .cloned()
                .ok_or_else(|| ReferenceCause::UnknownVariable {
                    available: self.values.keys().cloned().collect(),
                })
        }
    }

    fn scope(pairs: &[(&str, Value)]) -> MapScope {
        MapScope {
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn parses_sources_and_paths() {
        let reference = SpecReference::parse("infra.vpc.id").expect("parses");
        assert_eq!(reference.source, RefSource::Infra);
        assert_eq!(reference.name(), "vpc");
        assert_eq!(reference.sub_path(), ["id".to_string()]);
    }

    #[test]
    fn dangling_trailing_dot_is_malformed() {
        assert_eq!(
            SpecReference::parse("self."),
            Err(ReferenceCause::MalformedReference)
        );
        assert_eq!(
            SpecReference::parse("self.x."),
            Err(ReferenceCause::MalformedReference)
        );
    }

    #[test]
    fn unknown_source_is_its_own_cause() {
        assert_eq!(
            SpecReference::parse("foo.bar"),
            Err(ReferenceCause::UnknownSource)
        );
    }

    #[test]
    fn whole_token_preserves_type() {
        let mut scope = scope(&[("infra.vpc", json!({"id": "vpc-123"}))]);
        let value = resolve_template("${infra.vpc}", "properties.vpc", &mut scope).expect("ok");
        assert_eq!(value, json!({"id": "vpc-123"}));
    }

    #[test]
    fn embedded_object_reference_is_rejected() {
        let mut scope = scope(&[("infra.vpc", json!({"id": "vpc-123"}))]);
        let err =
            resolve_template("prefix-${infra.vpc}", "properties.vpc", &mut scope).unwrap_err();
        assert_eq!(err.cause, ReferenceCause::NonStringInterpolation);
        assert_eq!(err.path, "properties.vpc");
    }

    #[test]
    fn embedded_scalars_interpolate() {
        let mut scope = scope(&[
            ("self.port", json!(8080)),
            ("self.host", json!("localhost")),
        ]);
        let value =
            resolve_template("http://${self.host}:${self.port}/", "properties.url", &mut scope)
                .expect("ok");
        assert_eq!(value, json!("http://localhost:8080/"));
    }

    #[test]
    fn unknown_variable_names_available_ones() {
        let mut scope = scope(&[("self.declared", json!("x"))]);
        let err = resolve_template("${self.x}", "properties.p", &mut scope).unwrap_err();
        match err.cause {
            ReferenceCause::UnknownVariable { available } => {
                assert_eq!(available, vec!["self.declared".to_string()]);
            }
            other => panic!("unexpected cause: {other:?}"),
        }
    }

    #[test]
    fn resolves_nested_values() {
        let mut scope = scope(&[("self.bucket", json!("files"))]);
        let raw = json!({"env": {"BUCKET": "${self.bucket}"}, "count": 2});
        let value = resolve_value(&raw, "properties", &mut scope).expect("ok");
        assert_eq!(value, json!({"env": {"BUCKET": "files"}, "count": 2}));
    }

    #[test]
    fn plain_strings_pass_through() {
        let mut scope = scope(&[]);
        let value = resolve_template("no references", "p", &mut scope).expect("ok");
        assert_eq!(value, json!("no references"));
    }
}
