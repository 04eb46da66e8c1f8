use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, SugaError};
use crate::platform::PluginManifest;

/// A plugin found on disk, indexed by its manifest `name` (not directory
/// name).
#[derive(Debug, Clone)]
pub struct PluginEntry {
    pub manifest: PluginManifest,
    /// Directory containing the manifest; `deployment.terraform` resolves
    /// relative to it.
    pub dir: PathBuf,
}

impl PluginEntry {
    /// The plugin's Terraform module directory, confined to the plugin dir's
    /// tree. Escaping paths are rejected rather than served.
    pub fn terraform_dir(&self) -> Result<PathBuf> {
        normalize_under_root(&self.dir, Path::new(&self.manifest.deployment().terraform))
    }
}

/// A runtime module declaration served through the module proxy protocol.
#[derive(Debug, Clone)]
pub struct ModuleEntry {
    pub module_path: String,
    /// The declaration file itself (served as `.mod`).
    pub file: PathBuf,
    /// Directory zipped up for `.zip` requests.
    pub dir: PathBuf,
}

#[derive(Debug, Default)]
pub struct ServerIndex {
    pub plugins: HashMap<String, PluginEntry>,
    pub modules: HashMap<String, ModuleEntry>,
}

fn hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

/// Walks the base directory for plugin manifests and module declarations.
/// Dotfiles and dot-directories are skipped everywhere.
pub fn discover(base: &Path) -> Result<ServerIndex> {
    if !base.is_dir() {
        return Err(SugaError::Config(format!(
            "plugin directory {} does not exist",
            base.display()
        )));
    }

    let mut index = ServerIndex::default();
    for entry in WalkDir::new(base)
        .into_iter()
        .filter_entry(|e| !hidden(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        match entry.file_name().to_str() {
            Some("manifest.yaml") | Some("manifest.yml") => {
                index_manifest(&mut index, entry.path());
            }
            Some("go.mod") => {
                index_module(&mut index, entry.path());
            }
            _ => {}
        }
    }
    debug!(
        "indexed {} plugin(s) and {} module(s) under {}",
        index.plugins.len(),
        index.modules.len(),
        base.display()
    );
    Ok(index)
}

fn index_manifest(index: &mut ServerIndex, path: &Path) {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("skipping unreadable manifest {}: {err}", path.display());
            return;
        }
    };
    let manifest: PluginManifest = match serde_yaml_bw::from_str(&raw) {
        Ok(manifest) => manifest,
        Err(err) => {
            warn!("skipping invalid manifest {}: {err}", path.display());
            return;
        }
    };
    let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
    let name = manifest.name().to_string();
    if index.plugins.contains_key(&name) {
        warn!("duplicate plugin name '{name}' at {}; keeping the first", path.display());
        return;
    }
    index.plugins.insert(name, PluginEntry { manifest, dir });
}

fn index_module(index: &mut ServerIndex, path: &Path) {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("skipping unreadable module file {}: {err}", path.display());
            return;
        }
    };
    let Some(module_path) = parse_module_path(&raw) else {
        warn!("no module declaration in {}", path.display());
        return;
    };
    let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
    index.modules.insert(
        module_path.clone(),
        ModuleEntry {
            module_path,
            file: path.to_path_buf(),
            dir,
        },
    );
}

/// First `module <path>` line of a module declaration file.
fn parse_module_path(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        line.trim()
            .strip_prefix("module ")
            .map(|path| path.trim().trim_matches('"').to_string())
            .filter(|path| !path.is_empty())
    })
}

/// Normalize a manifest-relative path and ensure it stays within the plugin
/// directory. Rejects absolute paths and any that escape via `..`.
fn normalize_under_root(root: &Path, candidate: &Path) -> Result<PathBuf> {
    if candidate.is_absolute() {
        return Err(SugaError::Config(format!(
            "absolute module paths are not allowed: {}",
            candidate.display()
        )));
    }
    let root_canon = root.canonicalize()?;
    let joined = root_canon.join(candidate);
    let canon = joined.canonicalize()?;
    if !canon.starts_with(&root_canon) {
        return Err(SugaError::Config(format!(
            "module path escapes {}: {}",
            root_canon.display(),
            canon.display()
        )));
    }
    Ok(canon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    const MANIFEST: &str = "\
name: s3-bucket
deployment:
  terraform: ./terraform
";

    #[test]
    fn indexes_plugins_by_manifest_name() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("some-dir/manifest.yaml"), MANIFEST);
        fs::create_dir_all(dir.path().join("some-dir/terraform")).unwrap();

        let index = discover(dir.path()).expect("discovers");
        let entry = index.plugins.get("s3-bucket").expect("indexed by name");
        assert!(entry.terraform_dir().unwrap().ends_with("terraform"));
        assert!(!index.plugins.contains_key("some-dir"));
    }

    #[test]
    fn skips_dot_directories() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join(".hidden/manifest.yaml"), MANIFEST);
        let index = discover(dir.path()).expect("discovers");
        assert!(index.plugins.is_empty());
    }

    #[test]
    fn indexes_module_declarations() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("runtime/go.mod"),
            "module example.com/suga/runtime\n\ngo 1.22\n",
        );
        let index = discover(dir.path()).expect("discovers");
        let entry = index
            .modules
            .get("example.com/suga/runtime")
            .expect("module indexed");
        assert!(entry.file.ends_with("go.mod"));
    }

    #[test]
    fn terraform_dir_cannot_escape_the_plugin() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("p/manifest.yaml"),
            "name: esc\ndeployment:\n  terraform: ../outside\n",
        );
        fs::create_dir_all(dir.path().join("outside")).unwrap();
        let index = discover(dir.path()).expect("discovers");
        // The path resolves but escapes the plugin directory.
        assert!(index.plugins.get("esc").unwrap().terraform_dir().is_err());
    }
}
