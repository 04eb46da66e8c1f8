//! The deployment graph builder: intents × platform × plugin repository →
//! a wired module graph on disk.
//!
//! Plugin manifests are fetched up front (the only suspension points), then
//! the graph is materialized synchronously inside a panic shim and
//! serialized to the stack directory.

mod origins;
mod scope;
mod stack;

pub use origins::{fold_origins, Origin, OriginKind, OriginRoute, TargetInfo};
pub use scope::BuilderScope;
pub use stack::{
    module_attr, module_ref, variable_attr, variable_ref, Module, ModuleKind, OutputDecl, Stack,
    VariableDecl, IMAGE_MODULE_SOURCE,
};

use std::backtrace::Backtrace;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Map as JsonMap, Value};
use tracing::{debug, info};

use crate::error::{BlueprintReferenceError, ReferenceCause, Result, SugaError};
use crate::fsys::FileSystem;
use crate::platform::{
    IdentityBlueprint, IdentityManifest, PlatformSpec, PluginRepository, ResourceBlueprint,
    ResourceManifest, ServiceBlueprint, VariableSpec, CAPABILITY_SCHEDULES,
};
use crate::refs::{self, RefSource, Segment, SpecReference};
use crate::schema::{AccessAction, Application, Container, ServiceIntent};

pub struct ResolvedService {
    pub blueprint: ServiceBlueprint,
    pub manifest: ResourceManifest,
    pub identities: Vec<(IdentityBlueprint, IdentityManifest)>,
}

pub struct ResolvedResource {
    pub blueprint: ResourceBlueprint,
    pub manifest: ResourceManifest,
}

/// Everything the synchronous materialization phase needs, fetched ahead of
/// time through the composite repository.
#[derive(Default)]
pub struct ResolvedPlugins {
    pub services: BTreeMap<String, ResolvedService>,
    pub buckets: BTreeMap<String, ResolvedResource>,
    pub databases: BTreeMap<String, ResolvedResource>,
    pub entrypoints: BTreeMap<String, ResolvedResource>,
    pub infra: BTreeMap<String, ResolvedResource>,
}

pub struct GraphBuilder {
    platform: Arc<PlatformSpec>,
    repo: Arc<dyn PluginRepository>,
    fs: Arc<dyn FileSystem>,
    output_dir: PathBuf,
}

impl GraphBuilder {
    pub fn new(
        platform: Arc<PlatformSpec>,
        repo: Arc<dyn PluginRepository>,
        fs: Arc<dyn FileSystem>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            platform,
            repo,
            fs,
            output_dir: output_dir.into(),
        }
    }

    /// Builds and serializes the deployment graph, returning the stack path.
    pub async fn apply(&self, app: &Application) -> Result<PathBuf> {
        let resolved = self.resolve(app).await?;
        let stack = match panic::catch_unwind(AssertUnwindSafe(|| {
            materialize(app, &self.platform, &resolved)
        })) {
            Ok(stack) => stack?,
            Err(payload) => {
                return Err(SugaError::BuildPanic {
                    message: panic_message(payload.as_ref()),
                    stack_trace: Backtrace::force_capture().to_string(),
                });
            }
        };
        let path = stack.synthesize(self.fs.as_ref(), &self.output_dir)?;
        info!("stack written to {}", path.display());
        Ok(path)
    }

    /// Resolution phase: blueprint lookup per intent plus the plugin closure
    /// (including every infra blueprint, so lazy materialization never has
    /// to suspend).
    async fn resolve(&self, app: &Application) -> Result<ResolvedPlugins> {
        let mut resolved = ResolvedPlugins::default();

        let mut service_names: Vec<&String> = app.services.keys().collect();
        service_names.sort();
        for name in service_names {
            let intent = &app.services[name];
            let subtype = effective_subtype(&intent.subtype);
            let blueprint = self
                .platform
                .service_blueprint(subtype)
                .cloned()
                .ok_or_else(|| SugaError::MissingBlueprint {
                    intent: name.clone(),
                    intent_type: "service".into(),
                    subtype: subtype.to_string(),
                    available: self.platform.service_subtypes(),
                })?;
            let manifest = self
                .repo
                .get_resource_plugin(&blueprint.resource.plugin)
                .await?;
            let mut identities = Vec::new();
            for identity in &blueprint.identities {
                let identity_manifest = self.repo.get_identity_plugin(&identity.plugin).await?;
                identities.push((identity.clone(), identity_manifest));
            }
            resolved.services.insert(
                name.clone(),
                ResolvedService {
                    blueprint,
                    manifest,
                    identities,
                },
            );
        }

        resolved.buckets = self
            .resolve_resources(app.buckets.iter().map(|(n, i)| (n, &i.subtype)), "bucket", |s| {
                (
                    self.platform.bucket_blueprint(s).cloned(),
                    self.platform.bucket_subtypes(),
                )
            })
            .await?;
        resolved.databases = self
            .resolve_resources(
                app.databases.iter().map(|(n, i)| (n, &i.subtype)),
                "database",
                |s| {
                    (
                        self.platform.database_blueprint(s).cloned(),
                        self.platform.database_subtypes(),
                    )
                },
            )
            .await?;
        resolved.entrypoints = self
            .resolve_resources(
                app.entrypoints.iter().map(|(n, i)| (n, &i.subtype)),
                "entrypoint",
                |s| {
                    (
                        self.platform.entrypoint_blueprint(s).cloned(),
                        self.platform.entrypoint_subtypes(),
                    )
                },
            )
            .await?;

        for (name, blueprint) in &self.platform.infra {
            let manifest = self.repo.get_resource_plugin(&blueprint.plugin).await?;
            resolved.infra.insert(
                name.clone(),
                ResolvedResource {
                    blueprint: blueprint.clone(),
                    manifest,
                },
            );
        }

        Ok(resolved)
    }

    async fn resolve_resources<'a>(
        &self,
        intents: impl Iterator<Item = (&'a String, &'a Option<String>)>,
        intent_type: &str,
        lookup: impl Fn(&str) -> (Option<ResourceBlueprint>, Vec<String>),
    ) -> Result<BTreeMap<String, ResolvedResource>> {
        let mut sorted: Vec<(&String, &Option<String>)> = intents.collect();
        sorted.sort_by_key(|(name, _)| *name);

        let mut resolved = BTreeMap::new();
        for (name, subtype) in sorted {
            let subtype = effective_subtype(subtype);
            let (blueprint, available) = lookup(subtype);
            let blueprint = blueprint.ok_or_else(|| SugaError::MissingBlueprint {
                intent: name.clone(),
                intent_type: intent_type.to_string(),
                subtype: subtype.to_string(),
                available,
            })?;
            let manifest = self.repo.get_resource_plugin(&blueprint.plugin).await?;
            resolved.insert(
                name.clone(),
                ResolvedResource {
                    blueprint,
                    manifest,
                },
            );
        }
        Ok(resolved)
    }
}

fn effective_subtype(subtype: &Option<String>) -> &str {
    match subtype.as_deref() {
        Some(s) if !s.is_empty() => s,
        _ => "default",
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Synchronous graph construction. Intents iterate by sorted identifier;
/// entrypoints go last so their origins can see every target module.
fn materialize(
    app: &Application,
    platform: &PlatformSpec,
    resolved: &ResolvedPlugins,
) -> Result<Stack> {
    let mut stack = Stack::new(&app.name);
    let mut infra_modules: BTreeMap<String, String> = BTreeMap::new();

    for (name, service) in &resolved.services {
        let intent = &app.services[name];
        materialize_service(
            app,
            platform,
            resolved,
            &mut stack,
            &mut infra_modules,
            name,
            intent,
            service,
        )?;
    }

    for (name, resource) in &resolved.buckets {
        let access = &app.buckets[name].access;
        validate_access(app, "bucket", name, &resource.blueprint, access)?;
        materialize_resource(
            platform,
            resolved,
            &mut stack,
            &mut infra_modules,
            "buckets",
            name,
            resource,
            Some(access),
        )?;
    }

    for (name, resource) in &resolved.databases {
        let access = &app.databases[name].access;
        validate_access(app, "database", name, &resource.blueprint, access)?;
        materialize_resource(
            platform,
            resolved,
            &mut stack,
            &mut infra_modules,
            "databases",
            name,
            resource,
            Some(access),
        )?;
    }

    for (name, resource) in &resolved.entrypoints {
        materialize_entrypoint(
            app,
            platform,
            resolved,
            &mut stack,
            &mut infra_modules,
            name,
            resource,
        )?;
    }

    Ok(stack)
}

#[allow(clippy::too_many_arguments)]
fn materialize_service(
    app: &Application,
    platform: &PlatformSpec,
    resolved: &ResolvedPlugins,
    stack: &mut Stack,
    infra_modules: &mut BTreeMap<String, String>,
    name: &str,
    intent: &ServiceIntent,
    service: &ResolvedService,
) -> Result<()> {
    if !intent.triggers.is_empty() && !service.manifest.has_capability(CAPABILITY_SCHEDULES) {
        return Err(SugaError::CapabilityMismatch {
            service: name.to_string(),
            plugin: service.manifest.name.clone(),
            capability: CAPABILITY_SCHEDULES.to_string(),
        });
    }

    declare_intent_variables(stack, name, &service.blueprint.resource);

    let image_id = materialize_image(app, resolved, stack, name, intent)?;

    // Identity modules, keyed by the identity type their plugin declares.
    let mut provided: BTreeMap<String, String> = BTreeMap::new();
    for (identity, manifest) in &service.identities {
        let module_id = format!("{name}_{}_identity", identity.name);
        let mut inputs = resolve_properties(
            platform,
            resolved,
            stack,
            infra_modules,
            Some((name, &service.blueprint.resource.variables)),
            &format!("services.{name}.identities.{}", identity.name),
            &identity.properties,
        )?;
        inputs.insert(
            "suga".into(),
            json!({ "name": identity.name, "stack_id": stack.stack_id }),
        );
        let module = Module {
            id: module_id.clone(),
            kind: ModuleKind::Identity,
            source: manifest.deployment.terraform.clone(),
            inputs,
            depends_on: Vec::new(),
        };
        stack.add_output(module.id.clone(), module_ref(&module.id));
        stack.add_module(module);
        provided.insert(manifest.identity_type.clone(), module_id);
    }

    let provided_types: Vec<String> = provided.keys().cloned().collect();
    let missing: Vec<&String> = service
        .manifest
        .required_identities
        .iter()
        .filter(|required| !provided.contains_key(*required))
        .collect();
    if !missing.is_empty() {
        return Err(SugaError::MissingIdentity {
            plugin: service.manifest.name.clone(),
            required: service.manifest.required_identities.clone(),
            provided: provided_types,
        });
    }

    let mut inputs = resolve_properties(
        platform,
        resolved,
        stack,
        infra_modules,
        Some((name, &service.blueprint.resource.variables)),
        &format!("services.{name}"),
        &service.blueprint.resource.properties,
    )?;

    let mut depends_on = explicit_dependencies(
        platform,
        resolved,
        stack,
        infra_modules,
        &format!("services.{name}.depends_on"),
        &service.blueprint.resource.depends_on,
    )?;
    depends_on.push(image_id.clone());
    depends_on.extend(provided.values().cloned());
    depends_on.sort();
    depends_on.dedup();

    let identities: JsonMap<String, Value> = provided
        .iter()
        .map(|(identity_type, module_id)| (identity_type.clone(), module_ref(module_id)))
        .collect();
    let schedules: Vec<Value> = intent
        .triggers
        .iter()
        .map(|(trigger, spec)| {
            json!({
                "name": trigger,
                "schedule": spec.schedule,
                "path": spec.path.clone().unwrap_or_else(|| format!("/schedules/{trigger}")),
            })
        })
        .collect();

    inputs.insert(
        "suga".into(),
        json!({
            "name": name,
            "stack_id": stack.stack_id,
            "env": intent.env,
            "image": module_attr(&image_id, &["image_uri".to_string()]),
            "identities": identities,
            "schedules": schedules,
        }),
    );

    let module = Module {
        id: name.to_string(),
        kind: ModuleKind::Resource,
        source: service.manifest.deployment.terraform.clone(),
        inputs,
        depends_on,
    };
    stack.add_output(module.id.clone(), module_ref(&module.id));
    stack.add_module(module);
    Ok(())
}

/// Synthesizes the image module for a service. The `PLUGIN_DEFINITION` build
/// arg carries the JSON-encoded plugin manifest closure the service needs at
/// runtime: its own plugin plus every resource it has access to.
fn materialize_image(
    app: &Application,
    resolved: &ResolvedPlugins,
    stack: &mut Stack,
    name: &str,
    intent: &ServiceIntent,
) -> Result<String> {
    let module_id = format!("{name}_image");
    let plugin_definition = serde_json::to_string(&plugin_closure(app, resolved, name)?)?;

    let mut inputs = JsonMap::new();
    match &intent.container {
        Container {
            image: Some(image), ..
        } => {
            inputs.insert("image_id".into(), json!(image.id));
            inputs.insert(
                "tag".into(),
                json!(image.tag.clone().unwrap_or_else(|| "latest".to_string())),
            );
            inputs.insert("args".into(), json!({ "PLUGIN_DEFINITION": plugin_definition }));
        }
        Container {
            docker: Some(docker),
            ..
        } => {
            let mut args: JsonMap<String, Value> = docker
                .args
                .iter()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();
            args.insert("PLUGIN_DEFINITION".into(), json!(plugin_definition));
            inputs.insert("build_context".into(), json!(docker.context));
            inputs.insert("dockerfile".into(), json!(docker.dockerfile));
            inputs.insert("tag".into(), json!(format!("{}-{name}", stack.stack_id)));
            inputs.insert("args".into(), Value::Object(args));
        }
        _ => {
            // The validator enforces the oneof; reaching this is a builder bug.
            panic!("service '{name}' has neither image nor docker container");
        }
    }
    inputs.insert(
        "suga".into(),
        json!({ "name": name, "stack_id": stack.stack_id }),
    );

    let module = Module {
        id: module_id.clone(),
        kind: ModuleKind::Image,
        source: IMAGE_MODULE_SOURCE.to_string(),
        inputs,
        depends_on: Vec::new(),
    };
    stack.add_output(module.id.clone(), module_ref(&module.id));
    stack.add_module(module);
    Ok(module_id)
}

fn plugin_closure(
    app: &Application,
    resolved: &ResolvedPlugins,
    service: &str,
) -> Result<Value> {
    let manifest = &resolved.services[service].manifest;
    let mut resources = JsonMap::new();
    for (name, bucket) in &app.buckets {
        if bucket.access.contains_key(service) {
            resources.insert(name.clone(), serde_json::to_value(&resolved.buckets[name].manifest)?);
        }
    }
    for (name, database) in &app.databases {
        if database.access.contains_key(service) {
            resources.insert(
                name.clone(),
                serde_json::to_value(&resolved.databases[name].manifest)?,
            );
        }
    }
    Ok(json!({
        "service": serde_json::to_value(manifest)?,
        "resources": resources,
    }))
}

#[allow(clippy::too_many_arguments)]
fn materialize_resource(
    platform: &PlatformSpec,
    resolved: &ResolvedPlugins,
    stack: &mut Stack,
    infra_modules: &mut BTreeMap<String, String>,
    map_name: &str,
    name: &str,
    resource: &ResolvedResource,
    access: Option<&BTreeMap<String, Vec<AccessAction>>>,
) -> Result<()> {
    declare_intent_variables(stack, name, &resource.blueprint);

    let mut inputs = resolve_properties(
        platform,
        resolved,
        stack,
        infra_modules,
        Some((name, &resource.blueprint.variables)),
        &format!("{map_name}.{name}"),
        &resource.blueprint.properties,
    )?;

    let depends_on = explicit_dependencies(
        platform,
        resolved,
        stack,
        infra_modules,
        &format!("{map_name}.{name}.depends_on"),
        &resource.blueprint.depends_on,
    )?;

    let mut suga = JsonMap::new();
    suga.insert("name".into(), json!(name));
    suga.insert("stack_id".into(), json!(stack.stack_id));
    if let Some(access) = access {
        let expanded: JsonMap<String, Value> = access
            .iter()
            .map(|(service, actions)| {
                let actions: Vec<&str> = AccessAction::expand(actions)
                    .iter()
                    .map(AccessAction::as_str)
                    .collect();
                (service.clone(), json!(actions))
            })
            .collect();
        suga.insert("access".into(), Value::Object(expanded));
    }
    inputs.insert("suga".into(), Value::Object(suga));

    let module = Module {
        id: name.to_string(),
        kind: ModuleKind::Resource,
        source: resource.manifest.deployment.terraform.clone(),
        inputs,
        depends_on,
    };
    stack.add_output(module.id.clone(), module_ref(&module.id));
    stack.add_module(module);
    Ok(())
}

struct ResolvedTargets<'a> {
    app: &'a Application,
    resolved: &'a ResolvedPlugins,
}

impl TargetInfo for ResolvedTargets<'_> {
    fn exposes_domain_name(&self, target: &str) -> bool {
        let manifest = if self.app.services.contains_key(target) {
            self.resolved.services.get(target).map(|s| &s.manifest)
        } else {
            self.resolved.buckets.get(target).map(|r| &r.manifest)
        };
        manifest.is_some_and(|m| m.exposes_output("domain_name"))
    }

    fn exposed_outputs(&self, target: &str) -> Vec<String> {
        let manifest = if self.app.services.contains_key(target) {
            self.resolved.services.get(target).map(|s| &s.manifest)
        } else {
            self.resolved.buckets.get(target).map(|r| &r.manifest)
        };
        manifest
            .map(|m| m.outputs.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn materialize_entrypoint(
    app: &Application,
    platform: &PlatformSpec,
    resolved: &ResolvedPlugins,
    stack: &mut Stack,
    infra_modules: &mut BTreeMap<String, String>,
    name: &str,
    resource: &ResolvedResource,
) -> Result<()> {
    let intent = &app.entrypoints[name];
    declare_intent_variables(stack, name, &resource.blueprint);

    let mut inputs = resolve_properties(
        platform,
        resolved,
        stack,
        infra_modules,
        Some((name, &resource.blueprint.variables)),
        &format!("entrypoints.{name}"),
        &resource.blueprint.properties,
    )?;

    let targets = ResolvedTargets { app, resolved };
    let origins = fold_origins(app, intent, &targets);

    let mut depends_on = explicit_dependencies(
        platform,
        resolved,
        stack,
        infra_modules,
        &format!("entrypoints.{name}.depends_on"),
        &resource.blueprint.depends_on,
    )?;
    depends_on.extend(origins.keys().cloned());
    depends_on.sort();
    depends_on.dedup();

    inputs.insert(
        "suga".into(),
        json!({
            "name": name,
            "stack_id": stack.stack_id,
            "origins": origins,
        }),
    );

    let module = Module {
        id: name.to_string(),
        kind: ModuleKind::Resource,
        source: resource.manifest.deployment.terraform.clone(),
        inputs,
        depends_on,
    };
    stack.add_output(module.id.clone(), module_ref(&module.id));
    stack.add_module(module);
    Ok(())
}

/// Blueprint-scoped variables become typed stack variables prefixed with the
/// intent name; these are the names `self.*` resolves against.
fn declare_intent_variables(stack: &mut Stack, intent: &str, blueprint: &ResourceBlueprint) {
    for (var, spec) in &blueprint.variables {
        stack.add_variable(VariableDecl {
            name: format!("{intent}_{var}"),
            var_type: spec.var_type.clone(),
            default: spec.default.clone(),
            nullable: spec.nullable,
            description: spec.description.clone(),
        });
    }
}

/// Resolves a blueprint property map, materializing any referenced infra
/// modules first so the lookup scope never suspends or recurses.
fn resolve_properties(
    platform: &PlatformSpec,
    resolved: &ResolvedPlugins,
    stack: &mut Stack,
    infra_modules: &mut BTreeMap<String, String>,
    intent: Option<(&str, &BTreeMap<String, VariableSpec>)>,
    path: &str,
    properties: &BTreeMap<String, Value>,
) -> Result<JsonMap<String, Value>> {
    for name in referenced_infra(properties.values()) {
        materialize_infra(platform, resolved, stack, infra_modules, &name, &mut Vec::new())?;
    }

    let mut out = JsonMap::new();
    for (key, raw) in properties {
        let mut scope = BuilderScope {
            stack: &mut *stack,
            platform_variables: &platform.variables,
            infra_modules: &*infra_modules,
            intent,
        };
        let value = refs::resolve_value(raw, &format!("{path}.{key}"), &mut scope)?;
        out.insert(key.clone(), value);
    }
    Ok(out)
}

/// `depends_on:` entries are `infra.<name>` tokens (optionally `${…}`
/// wrapped); each one forces materialization of the named infra module.
fn explicit_dependencies(
    platform: &PlatformSpec,
    resolved: &ResolvedPlugins,
    stack: &mut Stack,
    infra_modules: &mut BTreeMap<String, String>,
    path: &str,
    depends_on: &[String],
) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for raw in depends_on {
        let token = raw
            .trim()
            .strip_prefix("${")
            .and_then(|t| t.strip_suffix('}'))
            .unwrap_or_else(|| raw.trim())
            .trim();
        let reference = SpecReference::parse(token).map_err(|cause| BlueprintReferenceError {
            token: token.to_string(),
            path: path.to_string(),
            cause,
        })?;
        if reference.source != RefSource::Infra || !reference.sub_path().is_empty() {
            return Err(BlueprintReferenceError {
                token: token.to_string(),
                path: path.to_string(),
                cause: ReferenceCause::MalformedReference,
            }
            .into());
        }
        materialize_infra(
            platform,
            resolved,
            stack,
            infra_modules,
            reference.name(),
            &mut Vec::new(),
        )?;
        let Some(module_id) = infra_modules.get(reference.name()) else {
            return Err(BlueprintReferenceError {
                token: token.to_string(),
                path: path.to_string(),
                cause: ReferenceCause::UnknownInfra {
                    available: resolved.infra.keys().cloned().collect(),
                },
            }
            .into());
        };
        out.push(module_id.clone());
    }
    out.sort();
    out.dedup();
    Ok(out)
}

/// Creates the infra module for `name` on first reference; unreferenced
/// infra never materializes. Infra blueprints may reference other infra, so
/// this recurses with a cycle guard.
fn materialize_infra(
    platform: &PlatformSpec,
    resolved: &ResolvedPlugins,
    stack: &mut Stack,
    infra_modules: &mut BTreeMap<String, String>,
    name: &str,
    visiting: &mut Vec<String>,
) -> Result<()> {
    if infra_modules.contains_key(name) {
        return Ok(());
    }
    let Some(resource) = resolved.infra.get(name) else {
        // Surfaces through the scope as UnknownInfra with the real list; the
        // eager pass just skips names it cannot place.
        debug!("skipping unknown infra reference '{name}'");
        return Ok(());
    };
    if visiting.iter().any(|v| v == name) {
        return Err(SugaError::Config(format!(
            "infra dependency cycle: {} -> {name}",
            visiting.join(" -> ")
        )));
    }
    visiting.push(name.to_string());

    for dependency in referenced_infra(resource.blueprint.properties.values()) {
        materialize_infra(platform, resolved, stack, infra_modules, &dependency, visiting)?;
    }
    let depends_on = explicit_dependencies(
        platform,
        resolved,
        stack,
        infra_modules,
        &format!("infra.{name}.depends_on"),
        &resource.blueprint.depends_on,
    )?;

    let module_id = format!("infra_{name}");
    // Register before resolving properties so self-references inside the
    // blueprint bind to the module being created.
    infra_modules.insert(name.to_string(), module_id.clone());

    let mut inputs = JsonMap::new();
    for (key, raw) in &resource.blueprint.properties {
        let mut scope = BuilderScope {
            stack: &mut *stack,
            platform_variables: &platform.variables,
            infra_modules: &*infra_modules,
            intent: None,
        };
        let value = refs::resolve_value(raw, &format!("infra.{name}.{key}"), &mut scope)?;
        inputs.insert(key.clone(), value);
    }
    inputs.insert(
        "suga".into(),
        json!({ "name": name, "stack_id": stack.stack_id }),
    );

    let module = Module {
        id: module_id.clone(),
        kind: ModuleKind::Infra,
        source: resource.manifest.deployment.terraform.clone(),
        inputs,
        depends_on,
    };
    stack.add_output(module.id.clone(), module_ref(&module.id));
    stack.add_module(module);
    visiting.pop();
    Ok(())
}

/// Infra names referenced anywhere inside the given values.
fn referenced_infra<'a>(values: impl Iterator<Item = &'a Value>) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for value in values {
        collect_infra_refs(value, &mut out);
    }
    out
}

fn collect_infra_refs(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            if let Ok(segments) = refs::parse_template(s) {
                for segment in segments {
                    if let Segment::Reference(reference) = segment {
                        if reference.source == RefSource::Infra {
                            out.insert(reference.name().to_string());
                        }
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_infra_refs(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_infra_refs(item, out);
            }
        }
        _ => {}
    }
}

/// Access validation against `usable_by`: a service may use a resource only
/// when its subtype appears in the blueprint's list (an empty list admits
/// everyone).
fn validate_access(
    app: &Application,
    kind: &str,
    resource: &str,
    blueprint: &ResourceBlueprint,
    access: &BTreeMap<String, Vec<AccessAction>>,
) -> Result<()> {
    if blueprint.usable_by.is_empty() {
        return Ok(());
    }
    for service in access.keys() {
        let Some(intent) = app.services.get(service) else {
            continue;
        };
        let subtype = intent
            .usable_by
            .as_deref()
            .unwrap_or_else(|| effective_subtype(&intent.subtype));
        if !blueprint.usable_by.iter().any(|s| s == subtype) {
            return Err(SugaError::Config(format!(
                "service '{service}' (subtype '{subtype}') may not access {kind} '{resource}'; \
                 usable_by allows [{}]",
                blueprint.usable_by.join(", ")
            )));
        }
    }
    Ok(())
}
