use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SugaError};
use crate::schema::{self, Application, Report};

/// The intent document at a project root.
pub const PROJECT_FILE: &str = "suga.yaml";
/// Generated stacks land under here, one directory per application.
pub const STACK_DIR: &str = ".suga/stack";

/// A loaded project: the raw document (kept for annotated error echoes),
/// the typed application, and the root directory.
pub struct Project {
    pub root: PathBuf,
    pub source: String,
    pub app: Application,
}

impl Project {
    /// Reads and parses `suga.yaml`; the report carries both structural and
    /// semantic findings.
    pub fn load(dir: &Path) -> Result<(Self, Report)> {
        let path = dir.join(PROJECT_FILE);
        if !path.exists() {
            return Err(SugaError::Config(format!(
                "no {PROJECT_FILE} found in {}; run `suga init` to create one",
                dir.display()
            )));
        }
        let source = fs::read_to_string(&path)?;
        let (app, report) = schema::load(&source)?;
        Ok((
            Self {
                root: dir.to_path_buf(),
                source,
                app,
            },
            report,
        ))
    }

    pub fn stack_dir(&self) -> PathBuf {
        self.root.join(STACK_DIR).join(&self.app.name)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

/// CLI-wide settings persisted under `~/.suga/settings.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
}

impl Settings {
    fn path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".suga/settings.json")
    }

    pub fn load() -> Self {
        let path = Self::path();
        fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Built-in project templates for `suga new` / `suga templates`.
pub const TEMPLATES: &[(&str, &str)] = &[
    (
        "api-service",
        "\
name: {{name}}
description: A single HTTP API service
target: suga/aws@1

services:
  api:
    container:
      docker:
        dockerfile: Dockerfile
        context: .
    dev:
      command: npm start

entrypoints:
  main:
    routes:
      /:
        target_name: api
",
    ),
    (
        "api-with-storage",
        "\
name: {{name}}
description: An API with a bucket and a database
target: suga/aws@1

services:
  api:
    container:
      docker:
        dockerfile: Dockerfile
        context: .
    dev:
      command: npm start

buckets:
  uploads:
    access:
      api: [read, write]

databases:
  main:
    env_var_key: DATABASE_URL
    access:
      api: [all]

entrypoints:
  main:
    routes:
      /:
        target_name: api
      /files/:
        target_name: uploads
",
    ),
];

pub fn template(name: &str) -> Option<&'static str> {
    TEMPLATES
        .iter()
        .find(|(template_name, _)| *template_name == name)
        .map(|(_, contents)| *contents)
}

/// Writes a fresh `suga.yaml` from a template. Project names must satisfy
/// the intent-name grammar after normalization.
pub fn bootstrap(dir: &Path, name: &str, template_name: &str, force: bool) -> Result<PathBuf> {
    let contents = template(template_name).ok_or_else(|| {
        SugaError::Config(format!(
            "unknown template '{template_name}' (available: {})",
            TEMPLATES
                .iter()
                .map(|(n, _)| *n)
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })?;

    let path = dir.join(PROJECT_FILE);
    if path.exists() && !force {
        return Err(SugaError::Config(format!(
            "{} already exists; pass --force to overwrite",
            path.display()
        )));
    }
    fs::create_dir_all(dir)?;
    let normalized = normalize_project_name(name);
    fs::write(&path, contents.replace("{{name}}", &normalized))?;
    Ok(path)
}

fn normalize_project_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "app".to_string()
    } else if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        format!("app_{trimmed}")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_writes_a_valid_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = bootstrap(dir.path(), "My App", "api-with-storage", false).expect("bootstraps");
        let source = fs::read_to_string(path).unwrap();
        let (app, report) = schema::load(&source).expect("parses");
        assert!(report.ok(), "{report}");
        assert_eq!(app.name, "my_app");
    }

    #[test]
    fn bootstrap_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        bootstrap(dir.path(), "app", "api-service", false).expect("first");
        let err = bootstrap(dir.path(), "app", "api-service", false).unwrap_err();
        assert!(err.to_string().contains("--force"));
        bootstrap(dir.path(), "app", "api-service", true).expect("forced");
    }

    #[test]
    fn normalizes_project_names() {
        assert_eq!(normalize_project_name("My Cool App"), "my_cool_app");
        assert_eq!(normalize_project_name("123"), "app_123");
        assert_eq!(normalize_project_name("---"), "app");
    }
}
