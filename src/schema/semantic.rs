use std::collections::BTreeMap;

use super::app::{AccessAction, Application, IntentKind, NAME_RE, RESERVED_NAMES};
use super::report::Report;

/// Knobs for the semantic pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions {
    /// Require every intent to carry a non-empty subtype. Platforms without
    /// a `default` blueprint per intent type turn this on.
    pub require_subtypes: bool,
}

/// Cross-reference pass over the typed document.
pub fn check(app: &Application, options: ValidateOptions) -> Report {
    let mut report = Report::default();

    check_names(app, &mut report);
    check_database_env_keys(app, &mut report);
    check_access(app, &mut report);
    check_entrypoints(app, &mut report);
    if options.require_subtypes {
        check_subtypes(app, &mut report);
    }

    report
}

fn check_names(app: &Application, report: &mut Report) {
    let mut by_name: BTreeMap<String, Vec<IntentKind>> = BTreeMap::new();
    for (name, kind) in app.sorted_intent_names() {
        by_name.entry(name).or_default().push(kind);
    }

    for (name, kinds) in &by_name {
        for kind in kinds.iter() {
            let path = format!("{}s.{}", kind.as_str(), name);
            if kinds.len() > 1 {
                let others: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
                report.push(
                    &path,
                    format!(
                        "intent name '{name}' is declared more than once ({})",
                        others.join(", ")
                    ),
                );
            }
            if !NAME_RE.is_match(name) {
                report.push(&path, "names must be snake_case ([a-z_][a-z0-9_]*)");
            }
            if RESERVED_NAMES.contains(&name.as_str()) {
                report.push(&path, format!("'{name}' is a reserved name"));
            }
        }
    }
}

fn check_database_env_keys(app: &Application, report: &mut Report) {
    let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
    for (name, database) in &app.databases {
        if let Some(first) = seen.get(database.env_var_key.as_str()) {
            report.push(
                format!("databases.{name}.env_var_key"),
                format!(
                    "env_var_key '{}' is already used by database '{first}'",
                    database.env_var_key
                ),
            );
        } else {
            seen.insert(&database.env_var_key, name);
        }
    }
}

fn check_access(app: &Application, report: &mut Report) {
    let check_one = |report: &mut Report,
                     kind: &str,
                     resource: &str,
                     access: &BTreeMap<String, Vec<AccessAction>>| {
        for service in access.keys() {
            if !app.services.contains_key(service) {
                report.push(
                    format!("{kind}.{resource}.access.{service}"),
                    format!("unknown service '{service}'"),
                );
            }
        }
    };

    for (name, bucket) in &app.buckets {
        check_one(report, "buckets", name, &bucket.access);
    }
    for (name, database) in &app.databases {
        check_one(report, "databases", name, &database.access);
    }
}

fn check_entrypoints(app: &Application, report: &mut Report) {
    for (name, entrypoint) in &app.entrypoints {
        for (path, route) in &entrypoint.routes {
            let route_path = format!("entrypoints.{name}.routes.{path}");
            if !path.ends_with('/') {
                report.push(&route_path, "route paths must end with '/'");
            }
            let target = &route.target_name;
            let is_service = app.services.contains_key(target);
            let is_bucket = app.buckets.contains_key(target);
            if !is_service && !is_bucket {
                report.push(
                    format!("{route_path}.target_name"),
                    format!("target '{target}' must name a service or bucket"),
                );
            }
        }
    }
}

fn check_subtypes(app: &Application, report: &mut Report) {
    let mut require = |path: String, subtype: &Option<String>| {
        if subtype.as_deref().unwrap_or("").is_empty() {
            report.push(path, "subtype is required by this platform");
        }
    };
    for (name, intent) in &app.services {
        require(format!("services.{name}.subtype"), &intent.subtype);
    }
    for (name, intent) in &app.buckets {
        require(format!("buckets.{name}.subtype"), &intent.subtype);
    }
    for (name, intent) in &app.databases {
        require(format!("databases.{name}.subtype"), &intent.subtype);
    }
    for (name, intent) in &app.entrypoints {
        require(format!("entrypoints.{name}.subtype"), &intent.subtype);
    }
}
