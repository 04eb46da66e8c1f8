use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde_json::json;
use tracing::info;

use crate::error::{Result, SugaError};
use crate::schema::Application;

/// One requested SDK output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub language: String,
    pub output: PathBuf,
}

/// Contract of the client SDK generator collaborator: it receives the typed
/// application plus one request per language.
pub trait SdkGenerator {
    fn generate(&self, app: &Application, request: &GenerateRequest) -> Result<()>;
}

/// Writes the generation descriptor the external codegen tooling consumes.
pub struct DescriptorGenerator;

impl SdkGenerator for DescriptorGenerator {
    fn generate(&self, app: &Application, request: &GenerateRequest) -> Result<()> {
        fs::create_dir_all(&request.output)?;
        let descriptor = json!({
            "language": request.language,
            "app": app.name,
            "services": app.services.keys().collect::<Vec<_>>(),
            "buckets": app.buckets.keys().collect::<Vec<_>>(),
            "databases": app.databases.keys().collect::<Vec<_>>(),
        });
        let path = request.output.join("client.gen.json");
        fs::write(&path, serde_json::to_string_pretty(&descriptor)?)?;
        info!("wrote {} descriptor to {}", request.language, path.display());
        Ok(())
    }
}

/// Parses `--<lang> [--<lang>-out DIR]` flag pairs. With no flags the caller
/// falls back to the document's `generate` config.
pub fn requests_from_args(args: &[String]) -> Result<Vec<GenerateRequest>> {
    let mut outputs: BTreeMap<String, Option<PathBuf>> = BTreeMap::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        let Some(flag) = arg.strip_prefix("--") else {
            return Err(SugaError::Config(format!(
                "unexpected argument '{arg}' (expected --<lang> or --<lang>-out)"
            )));
        };
        if let Some(language) = flag.strip_suffix("-out") {
            let dir = iter.next().ok_or_else(|| {
                SugaError::Config(format!("--{flag} requires a directory argument"))
            })?;
            outputs.insert(language.to_string(), Some(PathBuf::from(dir)));
        } else {
            outputs.entry(flag.to_string()).or_insert(None);
        }
    }
    Ok(outputs
        .into_iter()
        .map(|(language, output)| {
            let output = output.unwrap_or_else(|| PathBuf::from(format!("sdk/{language}")));
            GenerateRequest { language, output }
        })
        .collect())
}

/// Requests from the document's `generate` config.
pub fn requests_from_app(app: &Application) -> Vec<GenerateRequest> {
    app.generate
        .as_ref()
        .map(|config| {
            config
                .iter()
                .map(|(language, target)| GenerateRequest {
                    language: language.clone(),
                    output: PathBuf::from(&target.output),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_language_flag_pairs() {
        let args: Vec<String> = ["--python", "--python-out", "clients/py", "--go"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let requests = requests_from_args(&args).expect("parses");
        assert_eq!(
            requests,
            vec![
                GenerateRequest {
                    language: "go".into(),
                    output: PathBuf::from("sdk/go"),
                },
                GenerateRequest {
                    language: "python".into(),
                    output: PathBuf::from("clients/py"),
                },
            ]
        );
    }

    #[test]
    fn rejects_bare_positional_arguments() {
        let args = vec!["python".to_string()];
        assert!(requests_from_args(&args).is_err());
    }
}
