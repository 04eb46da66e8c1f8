//! Intent document parsing and validation.
//!
//! Two stages: a structural pass over the raw YAML value (required fields,
//! enums, the container oneof, unknown-field rejection) and a semantic pass
//! over the typed [`Application`] (cross-references, uniqueness, route
//! shapes). Only unparseable input is fatal; everything else lands in the
//! [`Report`].

mod app;
mod report;
mod semantic;
mod structural;

pub use app::{
    AccessAction, Application, BucketIntent, Container, DatabaseIntent, DevSpec, DockerSpec,
    EntrypointIntent, GenerateTarget, ImageSpec, IntentKind, Route, ServiceIntent, Target,
    TriggerSpec, NAME_RE, RESERVED_NAMES, TARGET_RE,
};
pub use report::{Report, ValidationError};
pub use semantic::ValidateOptions;
pub use structural::TARGET_FORMAT_MESSAGE;

use crate::error::{Result, SugaError};

/// Parses an intent document and runs the structural stage. The surface
/// syntax is YAML; the raw value is bridged into JSON terms so the checker
/// and the typed model share one representation.
///
/// Fails only with [`SugaError::MalformedDocument`] on unparseable input; a
/// document that parses but violates the schema comes back with a non-empty
/// report and a best-effort typed value.
pub fn parse(text: &str) -> Result<(Application, Report)> {
    let value: serde_json::Value = serde_yaml_bw::from_str(text)
        .map_err(|err| SugaError::MalformedDocument(err.to_string()))?;

    let mut report = structural::check(&value);
    let app = match serde_json::from_value::<Application>(value) {
        Ok(app) => app,
        Err(err) => {
            // The structural pass normally explains the failure with a dotted
            // path already; only fall back to the serde message when it has
            // nothing to say.
            if report.ok() {
                report.push("", err.to_string());
            }
            Application::default()
        }
    };
    Ok((app, report))
}

/// Semantic pass with default options.
pub fn validate(app: &Application) -> Report {
    semantic::check(app, ValidateOptions::default())
}

/// Semantic pass with explicit options (e.g. `require_subtypes`).
pub fn validate_with(app: &Application, options: ValidateOptions) -> Report {
    semantic::check(app, options)
}

/// Convenience for callers that want parse + validate as one report.
pub fn load(text: &str) -> Result<(Application, Report)> {
    let (app, mut report) = parse(text)?;
    report.merge(validate(&app));
    Ok((app, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "\
name: test_app
target: acme/platform@1
services:
  api:
    container:
      docker:
        dockerfile: Dockerfile
        context: .
buckets:
  uploads:
    access:
      api: [read, write]
";

    #[test]
    fn minimal_valid_document_has_no_errors() {
        let (app, report) = load(MINIMAL).expect("parses");
        assert!(report.ok(), "{report}");
        assert_eq!(app.name, "test_app");
        assert!(app.services.contains_key("api"));
        assert_eq!(
            app.buckets["uploads"].access["api"],
            vec![AccessAction::Read, AccessAction::Write]
        );
    }

    #[test]
    fn unparseable_input_is_a_malformed_document() {
        let err = parse("{unbalanced").unwrap_err();
        assert!(matches!(err, SugaError::MalformedDocument(_)));
    }

    #[test]
    fn duplicate_intent_names_flag_every_location() {
        let doc = "\
name: app
target: acme/platform@1
services:
  api:
    container:
      image: {id: img}
buckets:
  api: {}
";
        let (app, mut report) = parse(doc).expect("parses");
        assert!(report.ok(), "{report}");
        report.merge(validate(&app));
        let conflicts: Vec<&ValidationError> = report
            .errors
            .iter()
            .filter(|e| e.message.contains("more than once"))
            .collect();
        assert_eq!(conflicts.len(), 2);
        assert!(conflicts.iter().any(|e| e.path == "buckets.api"));
        assert!(conflicts.iter().any(|e| e.path == "services.api"));
    }

    #[test]
    fn route_without_trailing_slash_is_one_error() {
        let doc = "\
name: app
target: acme/platform@1
services:
  api:
    container:
      image: {id: img}
entrypoints:
  web:
    routes:
      /api:
        target_name: api
";
        let (app, report) = parse(doc).expect("parses");
        assert!(report.ok(), "{report}");
        let report = validate(&app);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("end with '/'"));
    }

    #[test]
    fn route_target_must_be_service_or_bucket() {
        let doc = "\
name: app
target: acme/platform@1
databases:
  main:
    env_var_key: DATABASE_URL
entrypoints:
  web:
    routes:
      /db/:
        target_name: main
";
        let (app, report) = parse(doc).expect("parses");
        assert!(report.ok(), "{report}");
        let report = validate(&app);
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("must name a service or bucket")));
    }

    #[test]
    fn duplicate_env_var_keys_are_rejected() {
        let doc = "\
name: app
target: acme/platform@1
databases:
  main:
    env_var_key: DATABASE_URL
  replica:
    env_var_key: DATABASE_URL
";
        let (app, report) = parse(doc).expect("parses");
        assert!(report.ok(), "{report}");
        let report = validate(&app);
        assert!(report
            .errors
            .iter()
            .any(|e| e.path == "databases.replica.env_var_key"));
    }

    #[test]
    fn access_on_missing_service_is_reported_once_per_pair() {
        let doc = "\
name: app
target: acme/platform@1
buckets:
  files:
    access:
      ghost: [read]
";
        let (app, report) = parse(doc).expect("parses");
        assert!(report.ok(), "{report}");
        let report = validate(&app);
        let hits: Vec<_> = report
            .errors
            .iter()
            .filter(|e| e.path == "buckets.files.access.ghost")
            .collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn reserved_names_are_rejected() {
        let doc = "\
name: app
target: acme/platform@1
services:
  backend:
    container:
      image: {id: img}
";
        let (app, report) = parse(doc).expect("parses");
        assert!(report.ok(), "{report}");
        let report = validate(&app);
        assert!(report.errors.iter().any(|e| e.message.contains("reserved")));
    }

    #[test]
    fn require_subtypes_mode_flags_bare_intents() {
        let (app, _) = parse(MINIMAL).expect("parses");
        let report = validate_with(
            &app,
            ValidateOptions {
                require_subtypes: true,
            },
        );
        assert!(report
            .errors
            .iter()
            .any(|e| e.path == "services.api.subtype"));
    }
}
