use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::fsys::FileSystem;

/// Well-known source for synthetic image modules; everything else points at
/// a plugin's `deployment.terraform`.
pub const IMAGE_MODULE_SOURCE: &str = "suga.dev/modules/container-image";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Infra,
    Resource,
    Identity,
    Image,
}

/// One node of the deployment graph. Immutable once added to the stack.
#[derive(Debug, Clone, Serialize)]
pub struct Module {
    pub id: String,
    pub kind: ModuleKind,
    /// Terraform module location from the plugin manifest.
    pub source: String,
    /// Resolved property bindings plus the synthetic `suga` input.
    pub inputs: serde_json::Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariableDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputDecl {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Serialize)]
struct StackHeader<'a> {
    name: &'a str,
    stack_id: &'a str,
    /// Backend selection happens at deploy time; the build leaves a null
    /// placeholder.
    backend: Option<Value>,
}

/// The deployment graph under construction: modules in creation order plus
/// variable and output declarations. Serialized to a stack directory and
/// discarded.
#[derive(Debug, Default)]
pub struct Stack {
    pub name: String,
    pub stack_id: String,
    modules: Vec<Module>,
    variables: Vec<VariableDecl>,
    outputs: Vec<OutputDecl>,
}

impl Stack {
    /// Creates the scaffold with a deterministic stack id seeded from the
    /// application name, so repeated builds of the same app are
    /// byte-identical.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let digest = Sha256::digest(name.as_bytes());
        let stack_id = format!("{name}-{:02x}{:02x}{:02x}{:02x}", digest[0], digest[1], digest[2], digest[3]);
        Self {
            name,
            stack_id,
            modules: Vec::new(),
            variables: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn has_module(&self, id: &str) -> bool {
        self.modules.iter().any(|m| m.id == id)
    }

    /// Adds a module node. Ids are unique by construction; a collision means
    /// the builder produced an inconsistent graph, which the panic shim
    /// reports as a `BuildPanic`.
    pub fn add_module(&mut self, module: Module) {
        assert!(
            !self.has_module(&module.id),
            "duplicate module id '{}'",
            module.id
        );
        self.modules.push(module);
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v.name == name)
    }

    pub fn add_variable(&mut self, variable: VariableDecl) {
        if !self.has_variable(&variable.name) {
            self.variables.push(variable);
        }
    }

    pub fn add_output(&mut self, name: impl Into<String>, value: Value) {
        self.outputs.push(OutputDecl {
            name: name.into(),
            value,
        });
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn variables(&self) -> &[VariableDecl] {
        &self.variables
    }

    pub fn outputs(&self) -> &[OutputDecl] {
        &self.outputs
    }

    /// Serializes the graph into `dir`, returning the stack path. The four
    /// documents are the input contract of the module file writer.
    pub fn synthesize(&self, fs: &dyn FileSystem, dir: &Path) -> Result<PathBuf> {
        fs.create_dir_all(dir)?;
        let header = StackHeader {
            name: &self.name,
            stack_id: &self.stack_id,
            backend: None,
        };
        write_json(fs, &dir.join("stack.json"), &header)?;
        write_json(fs, &dir.join("modules.json"), &self.modules)?;
        write_json(fs, &dir.join("variables.json"), &self.variables)?;
        write_json(fs, &dir.join("outputs.json"), &self.outputs)?;
        Ok(dir.to_path_buf())
    }
}

fn write_json<T: Serialize>(fs: &dyn FileSystem, path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_vec_pretty(value)?;
    payload.push(b'\n');
    fs.write(path, &payload)?;
    Ok(())
}

/// A type-preserved binding to another module's value object.
pub fn module_ref(id: &str) -> Value {
    serde_json::json!({ "@ref": format!("module.{id}") })
}

/// A string-coercible binding to one attribute of a module's outputs.
pub fn module_attr(id: &str, sub_path: &[String]) -> Value {
    Value::String(format!("${{module.{id}.{}}}", sub_path.join(".")))
}

/// A type-preserved binding to a declared variable.
pub fn variable_ref(name: &str) -> Value {
    serde_json::json!({ "@var": name })
}

/// A string-coercible binding to a scalar variable (or attribute of one).
pub fn variable_attr(name: &str, sub_path: &[String]) -> Value {
    if sub_path.is_empty() {
        Value::String(format!("${{var.{name}}}"))
    } else {
        Value::String(format!("${{var.{name}.{}}}", sub_path.join(".")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsys::OsFileSystem;

    #[test]
    fn stack_id_is_deterministic() {
        let a = Stack::new("my_app");
        let b = Stack::new("my_app");
        assert_eq!(a.stack_id, b.stack_id);
        assert!(a.stack_id.starts_with("my_app-"));
        assert_ne!(Stack::new("other").stack_id, a.stack_id);
    }

    #[test]
    #[should_panic(expected = "duplicate module id")]
    fn duplicate_module_ids_panic() {
        let mut stack = Stack::new("app");
        let module = Module {
            id: "api".into(),
            kind: ModuleKind::Resource,
            source: "src".into(),
            inputs: serde_json::Map::new(),
            depends_on: Vec::new(),
        };
        stack.add_module(module.clone());
        stack.add_module(module);
    }

    #[test]
    fn synthesize_writes_the_graph_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut stack = Stack::new("app");
        stack.add_module(Module {
            id: "api".into(),
            kind: ModuleKind::Resource,
            source: "acme/terraform".into(),
            inputs: serde_json::Map::new(),
            depends_on: vec!["infra_vpc".into()],
        });
        let path = stack
            .synthesize(&OsFileSystem, dir.path())
            .expect("synthesizes");
        for doc in ["stack.json", "modules.json", "variables.json", "outputs.json"] {
            assert!(path.join(doc).exists(), "{doc} missing");
        }
        let modules = std::fs::read_to_string(path.join("modules.json")).unwrap();
        assert!(modules.contains("\"infra_vpc\""));
    }
}
