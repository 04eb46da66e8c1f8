use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ReferenceCause;
use crate::platform::VariableSpec;
use crate::refs::{RefSource, ReferenceScope, SpecReference};

use super::stack::{module_attr, module_ref, variable_attr, variable_ref, Stack, VariableDecl};

const SCALAR_TYPES: &[&str] = &["string", "number", "bool"];

fn is_scalar(var_type: &str) -> bool {
    SCALAR_TYPES.contains(&var_type)
}

/// Binding for a declared variable: scalar variables interpolate, composite
/// ones stay type-preserved objects.
fn variable_binding(decl_name: &str, spec: &VariableSpec, sub_path: &[String]) -> Value {
    if sub_path.is_empty() && !is_scalar(&spec.var_type) {
        variable_ref(decl_name)
    } else {
        variable_attr(decl_name, sub_path)
    }
}

/// The builder-side resolution environment for one property pass.
///
/// `self.*` reads the enclosing intent's blueprint variables, `var.*`
/// materializes platform variables lazily into the stack, and `infra.*`
/// binds against infra modules the builder materialized beforehand.
pub struct BuilderScope<'a> {
    pub stack: &'a mut Stack,
    pub platform_variables: &'a BTreeMap<String, VariableSpec>,
    /// infra name → module id, for everything materialized so far.
    pub infra_modules: &'a BTreeMap<String, String>,
    /// Current intent name and its blueprint-scoped variables, when
    /// resolving inside an intent.
    pub intent: Option<(&'a str, &'a BTreeMap<String, VariableSpec>)>,
}

impl ReferenceScope for BuilderScope<'_> {
    fn lookup(&mut self, reference: &SpecReference) -> Result<Value, ReferenceCause> {
        match reference.source {
            RefSource::SelfScope => {
                let Some((intent, variables)) = self.intent else {
                    return Err(ReferenceCause::UnknownSource);
                };
                let Some(spec) = variables.get(reference.name()) else {
                    return Err(ReferenceCause::UnknownVariable {
                        available: variables.keys().cloned().collect(),
                    });
                };
                let decl_name = format!("{intent}_{}", reference.name());
                Ok(variable_binding(&decl_name, spec, reference.sub_path()))
            }
            RefSource::Var => {
                let Some(spec) = self.platform_variables.get(reference.name()) else {
                    return Err(ReferenceCause::UnknownVariable {
                        available: self.platform_variables.keys().cloned().collect(),
                    });
                };
                // Platform variables materialize on first use; lookup order
                // is stable, so repeated references share one declaration.
                if !self.stack.has_variable(reference.name()) {
                    self.stack.add_variable(VariableDecl {
                        name: reference.name().to_string(),
                        var_type: spec.var_type.clone(),
                        default: spec.default.clone(),
                        nullable: spec.nullable,
                        description: spec.description.clone(),
                    });
                }
                Ok(variable_binding(reference.name(), spec, reference.sub_path()))
            }
            RefSource::Infra => {
                let Some(module_id) = self.infra_modules.get(reference.name()) else {
                    return Err(ReferenceCause::UnknownInfra {
                        available: self.infra_modules.keys().cloned().collect(),
                    });
                };
                if reference.sub_path().is_empty() {
                    Ok(module_ref(module_id))
                } else {
                    Ok(module_attr(module_id, reference.sub_path()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::resolve_template;
    use serde_json::json;

    fn variable(var_type: &str) -> VariableSpec {
        VariableSpec {
            var_type: var_type.to_string(),
            default: None,
            nullable: false,
            description: None,
        }
    }

    #[test]
    fn self_references_bind_intent_scoped_variables() {
        let mut stack = Stack::new("app");
        let platform_variables = BTreeMap::new();
        let infra_modules = BTreeMap::new();
        let intent_vars = BTreeMap::from([("bucket_name".to_string(), variable("string"))]);
        let mut scope = BuilderScope {
            stack: &mut stack,
            platform_variables: &platform_variables,
            infra_modules: &infra_modules,
            intent: Some(("uploads", &intent_vars)),
        };
        let value = resolve_template("${self.bucket_name}", "properties.name", &mut scope)
            .expect("resolves");
        assert_eq!(value, json!("${var.uploads_bucket_name}"));
    }

    #[test]
    fn var_references_materialize_once() {
        let mut stack = Stack::new("app");
        let platform_variables =
            BTreeMap::from([("region".to_string(), variable("string"))]);
        let infra_modules = BTreeMap::new();
        let mut scope = BuilderScope {
            stack: &mut stack,
            platform_variables: &platform_variables,
            infra_modules: &infra_modules,
            intent: None,
        };
        resolve_template("${var.region}", "p", &mut scope).expect("first use");
        resolve_template("in-${var.region}", "p", &mut scope).expect("second use");
        assert_eq!(stack.variables().len(), 1);
    }

    #[test]
    fn whole_infra_reference_is_an_object_binding() {
        let mut stack = Stack::new("app");
        let platform_variables = BTreeMap::new();
        let infra_modules = BTreeMap::from([("vpc".to_string(), "infra_vpc".to_string())]);
        let mut scope = BuilderScope {
            stack: &mut stack,
            platform_variables: &platform_variables,
            infra_modules: &infra_modules,
            intent: None,
        };
        let whole = resolve_template("${infra.vpc}", "p", &mut scope).expect("resolves");
        assert_eq!(whole, json!({"@ref": "module.infra_vpc"}));

        let err = resolve_template("prefix-${infra.vpc}", "p", &mut scope).unwrap_err();
        assert_eq!(err.cause, ReferenceCause::NonStringInterpolation);

        let attr = resolve_template("${infra.vpc.id}", "p", &mut scope).expect("resolves");
        assert_eq!(attr, json!("${module.infra_vpc.id}"));
    }

    #[test]
    fn unknown_infra_lists_available_resources() {
        let mut stack = Stack::new("app");
        let platform_variables = BTreeMap::new();
        let infra_modules = BTreeMap::from([("vpc".to_string(), "infra_vpc".to_string())]);
        let mut scope = BuilderScope {
            stack: &mut stack,
            platform_variables: &platform_variables,
            infra_modules: &infra_modules,
            intent: None,
        };
        let err = resolve_template("${infra.subnet}", "p", &mut scope).unwrap_err();
        assert_eq!(
            err.cause,
            ReferenceCause::UnknownInfra {
                available: vec!["vpc".to_string()]
            }
        );
    }
}
