use serde_json::{Map, Value};

use super::app::TARGET_RE;
use super::report::Report;

pub const TARGET_FORMAT_MESSAGE: &str =
    "must look like team/platform@revision or file:path";

const TOP_LEVEL_KEYS: &[&str] = &[
    "name",
    "description",
    "target",
    "services",
    "buckets",
    "databases",
    "entrypoints",
    "generate",
];
const SERVICE_KEYS: &[&str] = &[
    "subtype",
    "container",
    "env",
    "triggers",
    "usable-by",
    "language",
    "client_library_output",
    "dev",
];
const BUCKET_KEYS: &[&str] = &["subtype", "access"];
const DATABASE_KEYS: &[&str] = &["subtype", "env_var_key", "access"];
const ENTRYPOINT_KEYS: &[&str] = &["subtype", "routes"];
const IMAGE_KEYS: &[&str] = &["id", "tag"];
const DOCKER_KEYS: &[&str] = &["dockerfile", "context", "args"];
const TRIGGER_KEYS: &[&str] = &["schedule", "path"];
const ROUTE_KEYS: &[&str] = &["target_name", "target", "base_path"];
const DEV_KEYS: &[&str] = &["command", "dir"];
const ACCESS_ACTIONS: &[&str] = &["read", "write", "delete", "all"];

/// Structural pass: required fields, enums, regex constraints, the container
/// oneof, and unknown-field rejection, all reported with dotted paths.
pub fn check(doc: &Value) -> Report {
    let mut c = Checker::default();
    let Some(root) = doc.as_object() else {
        c.report.push("", "document must be a mapping");
        return c.report;
    };

    c.reject_unknown(root, "", TOP_LEVEL_KEYS);
    c.required_str(root, "", "name");
    c.optional_str(root, "", "description");

    match root.get("target") {
        None => c.report.push("target", "required"),
        Some(value) => match value.as_str() {
            None => c.report.push("target", "must be a string"),
            Some(raw) => {
                let file_ok = raw.strip_prefix("file:").is_some_and(|p| !p.is_empty());
                if !file_ok && !TARGET_RE.is_match(raw) {
                    c.report.push("target", TARGET_FORMAT_MESSAGE);
                }
            }
        },
    }

    c.intent_map(root, "services", |c, path, intent| c.service(path, intent));
    c.intent_map(root, "buckets", |c, path, intent| c.bucket(path, intent));
    c.intent_map(root, "databases", |c, path, intent| c.database(path, intent));
    c.intent_map(root, "entrypoints", |c, path, intent| {
        c.entrypoint(path, intent)
    });

    if let Some(generate) = root.get("generate") {
        match generate.as_object() {
            None => c.report.push("generate", "must be a mapping"),
            Some(map) => {
                for (lang, settings) in map {
                    let path = format!("generate.{lang}");
                    match settings.as_object() {
                        None => c.report.push(&path, "must be a mapping"),
                        Some(settings) => {
                            c.reject_unknown(settings, &path, &["output"]);
                            c.required_str(settings, &path, "output");
                        }
                    }
                }
            }
        }
    }

    c.report
}

#[derive(Default)]
struct Checker {
    report: Report,
}

impl Checker {
    fn reject_unknown(&mut self, map: &Map<String, Value>, path: &str, allowed: &[&str]) {
        for key in map.keys() {
            if !allowed.contains(&key.as_str()) {
                self.report
                    .push(join(path, key), format!("unknown field '{key}'"));
            }
        }
    }

    fn required_str(&mut self, map: &Map<String, Value>, path: &str, key: &str) {
        match map.get(key) {
            None => self.report.push(join(path, key), "required"),
            Some(value) => {
                if value.as_str().is_none() {
                    self.report.push(join(path, key), "must be a string");
                }
            }
        }
    }

    fn optional_str(&mut self, map: &Map<String, Value>, path: &str, key: &str) {
        if let Some(value) = map.get(key) {
            if value.as_str().is_none() {
                self.report.push(join(path, key), "must be a string");
            }
        }
    }

    fn string_map(&mut self, map: &Map<String, Value>, path: &str, key: &str) {
        let Some(value) = map.get(key) else { return };
        let entry_path = join(path, key);
        match value.as_object() {
            None => self.report.push(&entry_path, "must be a mapping"),
            Some(env) => {
                for (name, value) in env {
                    if name.is_empty() {
                        self.report.push(&entry_path, "keys must be non-empty");
                    }
                    if !value.is_string() && !value.is_boolean() && !value.is_number() {
                        self.report.push(join(&entry_path, name), "must be a scalar");
                    }
                }
            }
        }
    }

    fn intent_map<F>(&mut self, root: &Map<String, Value>, key: &str, mut check_one: F)
    where
        F: FnMut(&mut Self, &str, &Map<String, Value>),
    {
        let Some(value) = root.get(key) else { return };
        let Some(map) = value.as_object() else {
            self.report.push(key, "must be a mapping");
            return;
        };
        for (name, intent) in map {
            let path = format!("{key}.{name}");
            match intent.as_object() {
                None => self.report.push(&path, "must be a mapping"),
                Some(intent) => check_one(self, &path, intent),
            }
        }
    }

    fn service(&mut self, path: &str, intent: &Map<String, Value>) {
        self.reject_unknown(intent, path, SERVICE_KEYS);
        self.optional_str(intent, path, "subtype");
        self.optional_str(intent, path, "usable-by");
        self.optional_str(intent, path, "language");
        self.optional_str(intent, path, "client_library_output");
        self.string_map(intent, path, "env");
        self.container(path, intent);
        self.triggers(path, intent);
        if let Some(dev) = intent.get("dev") {
            let dev_path = join(path, "dev");
            match dev.as_object() {
                None => self.report.push(&dev_path, "must be a mapping"),
                Some(dev) => {
                    self.reject_unknown(dev, &dev_path, DEV_KEYS);
                    self.required_str(dev, &dev_path, "command");
                    self.optional_str(dev, &dev_path, "dir");
                }
            }
        }
    }

    fn container(&mut self, path: &str, intent: &Map<String, Value>) {
        let container_path = join(path, "container");
        let Some(container) = intent.get("container") else {
            self.report.push(&container_path, "required");
            return;
        };
        let Some(container) = container.as_object() else {
            self.report.push(&container_path, "must be a mapping");
            return;
        };
        self.reject_unknown(container, &container_path, &["image", "docker"]);

        let image = container.get("image");
        let docker = container.get("docker");
        if image.is_some() == docker.is_some() {
            self.report
                .push(&container_path, "exactly one of image/docker is required");
        }
        if let Some(image) = image {
            let image_path = join(&container_path, "image");
            match image.as_object() {
                None => self.report.push(&image_path, "must be a mapping"),
                Some(image) => {
                    self.reject_unknown(image, &image_path, IMAGE_KEYS);
                    self.required_str(image, &image_path, "id");
                    self.optional_str(image, &image_path, "tag");
                }
            }
        }
        if let Some(docker) = docker {
            let docker_path = join(&container_path, "docker");
            match docker.as_object() {
                None => self.report.push(&docker_path, "must be a mapping"),
                Some(docker) => {
                    self.reject_unknown(docker, &docker_path, DOCKER_KEYS);
                    self.required_str(docker, &docker_path, "dockerfile");
                    self.required_str(docker, &docker_path, "context");
                    self.string_map(docker, &docker_path, "args");
                }
            }
        }
    }

    fn triggers(&mut self, path: &str, intent: &Map<String, Value>) {
        let Some(triggers) = intent.get("triggers") else {
            return;
        };
        let triggers_path = join(path, "triggers");
        let Some(triggers) = triggers.as_object() else {
            self.report.push(&triggers_path, "must be a mapping");
            return;
        };
        for (name, trigger) in triggers {
            let trigger_path = join(&triggers_path, name);
            match trigger.as_object() {
                None => self.report.push(&trigger_path, "must be a mapping"),
                Some(trigger) => {
                    self.reject_unknown(trigger, &trigger_path, TRIGGER_KEYS);
                    self.required_str(trigger, &trigger_path, "schedule");
                    self.optional_str(trigger, &trigger_path, "path");
                }
            }
        }
    }

    fn access(&mut self, path: &str, intent: &Map<String, Value>) {
        let Some(access) = intent.get("access") else {
            return;
        };
        let access_path = join(path, "access");
        let Some(access) = access.as_object() else {
            self.report.push(&access_path, "must be a mapping");
            return;
        };
        for (service, actions) in access {
            let service_path = join(&access_path, service);
            let Some(actions) = actions.as_array() else {
                self.report.push(&service_path, "must be a list of actions");
                continue;
            };
            for action in actions {
                match action.as_str() {
                    Some(action) if ACCESS_ACTIONS.contains(&action) => {}
                    Some(action) => self.report.push(
                        &service_path,
                        format!(
                            "invalid action '{action}' (expected one of {})",
                            ACCESS_ACTIONS.join("|")
                        ),
                    ),
                    None => self.report.push(&service_path, "actions must be strings"),
                }
            }
        }
    }

    fn bucket(&mut self, path: &str, intent: &Map<String, Value>) {
        self.reject_unknown(intent, path, BUCKET_KEYS);
        self.optional_str(intent, path, "subtype");
        self.access(path, intent);
    }

    fn database(&mut self, path: &str, intent: &Map<String, Value>) {
        self.reject_unknown(intent, path, DATABASE_KEYS);
        self.optional_str(intent, path, "subtype");
        self.required_str(intent, path, "env_var_key");
        self.access(path, intent);
    }

    fn entrypoint(&mut self, path: &str, intent: &Map<String, Value>) {
        self.reject_unknown(intent, path, ENTRYPOINT_KEYS);
        self.optional_str(intent, path, "subtype");
        let routes_path = join(path, "routes");
        let Some(routes) = intent.get("routes") else {
            self.report.push(&routes_path, "required");
            return;
        };
        let Some(routes) = routes.as_object() else {
            self.report.push(&routes_path, "must be a mapping");
            return;
        };
        for (route, spec) in routes {
            let route_path = join(&routes_path, route);
            match spec.as_object() {
                None => self.report.push(&route_path, "must be a mapping"),
                Some(spec) => {
                    self.reject_unknown(spec, &route_path, ROUTE_KEYS);
                    if !spec.contains_key("target_name") && !spec.contains_key("target") {
                        self.report
                            .push(join(&route_path, "target_name"), "required");
                    }
                    self.optional_str(spec, &route_path, "target_name");
                    self.optional_str(spec, &route_path, "target");
                    self.optional_str(spec, &route_path, "base_path");
                }
            }
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_str(doc: &str) -> Report {
        let value: Value = serde_yaml_bw::from_str(doc).expect("parse yaml");
        check(&value)
    }

    #[test]
    fn missing_target_is_a_single_required_error() {
        let report = check_str("name: app\n");
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, "target");
        assert_eq!(report.errors[0].message, "required");
    }

    #[test]
    fn invalid_target_reports_the_format_message() {
        let report = check_str("name: app\ntarget: invalid\n");
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].message, TARGET_FORMAT_MESSAGE);
    }

    #[test]
    fn container_requires_exactly_one_variant() {
        let both = "\
name: app
target: acme/platform@1
services:
  api:
    container:
      image: {id: img}
      docker: {dockerfile: Dockerfile, context: .}
";
        let report = check_str(both);
        assert!(report
            .errors
            .iter()
            .any(|e| e.path == "services.api.container"
                && e.message.contains("exactly one")));

        let neither = "\
name: app
target: acme/platform@1
services:
  api:
    container: {}
";
        let report = check_str(neither);
        assert!(report
            .errors
            .iter()
            .any(|e| e.path == "services.api.container"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let report = check_str("name: app\ntarget: acme/platform@1\nbogus: 1\n");
        assert!(report
            .errors
            .iter()
            .any(|e| e.path == "bogus" && e.message.contains("unknown field")));
    }

    #[test]
    fn invalid_access_action_is_flagged() {
        let doc = "\
name: app
target: acme/platform@1
buckets:
  files:
    access:
      api: [read, audit]
";
        let report = check_str(doc);
        assert!(report
            .errors
            .iter()
            .any(|e| e.path == "buckets.files.access.api"
                && e.message.contains("invalid action 'audit'")));
    }

    #[test]
    fn empty_intent_maps_are_permitted() {
        let report = check_str("name: app\ntarget: acme/platform@1\nservices: {}\n");
        assert!(report.ok(), "{report}");
    }
}
