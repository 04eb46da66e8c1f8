use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use suga::builder::GraphBuilder;
use suga::error::{ReferenceCause, SugaError};
use suga::fsys::OsFileSystem;
use suga::platform::{
    IdentityManifest, PlatformSpec, PluginManifest, PluginRepository, PluginSource,
    ResourceManifest,
};
use suga::schema;

const PLATFORM: &str = r#"
name: test-platform
libraries:
  acme/aws: "1.0.0"
variables:
  region:
    type: string
    default: us-east-1
services:
  default:
    plugin: {library: acme/aws, plugin: container-service}
    properties:
      memory: 512
      vpc: "${infra.vpc}"
      region: "${var.region}"
      cpu: "${self.cpu}"
    variables:
      cpu:
        type: number
        default: 256
    identities:
      - name: main
        plugin: {library: acme/aws, plugin: service-role}
buckets:
  default:
    plugin: {library: acme/aws, plugin: object-store}
    properties:
      vpc_id: "${infra.vpc.id}"
    depends_on: [infra.vpc]
entrypoints:
  default:
    plugin: {library: acme/aws, plugin: gateway}
infra:
  vpc:
    plugin: {library: acme/aws, plugin: network}
"#;

const APP: &str = r#"
name: test_app
target: acme/test-platform@1
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
entrypoints:
  main:
    routes:
      /api/:
        target_name: api
      /files/:
        target_name: uploads
"#;

fn resource_manifest(yaml: &str) -> ResourceManifest {
    let manifest: PluginManifest = serde_yaml_bw::from_str(yaml).expect("manifest parses");
    manifest.as_resource().expect("resource manifest").clone()
}

fn identity_manifest(yaml: &str) -> IdentityManifest {
    let manifest: PluginManifest = serde_yaml_bw::from_str(yaml).expect("manifest parses");
    manifest.as_identity().expect("identity manifest").clone()
}

struct StaticRepo {
    resources: HashMap<String, ResourceManifest>,
    identities: HashMap<String, IdentityManifest>,
}

impl StaticRepo {
    fn standard() -> Self {
        let mut resources = HashMap::new();
        resources.insert(
            "container-service".to_string(),
            resource_manifest(
                "\
name: container-service
outputs:
  domain_name: {type: string}
deployment: {terraform: acme/modules/container-service}
required_identities: [aws-role]
capabilities: [schedules]
",
            ),
        );
        resources.insert(
            "object-store".to_string(),
            resource_manifest(
                "\
name: object-store
outputs:
  domain_name: {type: string}
  bucket_arn: {type: string}
deployment: {terraform: acme/modules/object-store}
",
            ),
        );
        resources.insert(
            "gateway".to_string(),
            resource_manifest("name: gateway\ndeployment: {terraform: acme/modules/gateway}\n"),
        );
        resources.insert(
            "network".to_string(),
            resource_manifest("name: network\ndeployment: {terraform: acme/modules/network}\n"),
        );
        let mut identities = HashMap::new();
        identities.insert(
            "service-role".to_string(),
            identity_manifest(
                "\
type: identity
name: service-role
identity_type: aws-role
deployment: {terraform: acme/modules/service-role}
",
            ),
        );
        Self {
            resources,
            identities,
        }
    }

    fn without_schedules(mut self) -> Self {
        self.resources
            .get_mut("container-service")
            .unwrap()
            .capabilities
            .clear();
        self
    }
}

#[async_trait]
impl PluginRepository for StaticRepo {
    async fn get_resource_plugin(&self, source: &PluginSource) -> suga::Result<ResourceManifest> {
        self.resources
            .get(&source.plugin)
            .cloned()
            .ok_or_else(|| SugaError::Other(format!("no plugin '{}'", source.plugin)))
    }

    async fn get_identity_plugin(&self, source: &PluginSource) -> suga::Result<IdentityManifest> {
        self.identities
            .get(&source.plugin)
            .cloned()
            .ok_or_else(|| SugaError::Other(format!("no identity plugin '{}'", source.plugin)))
    }
}

fn load_app(doc: &str) -> suga::Application {
    let (app, report) = schema::load(doc).expect("app parses");
    assert!(report.ok(), "{report}");
    app
}

fn load_platform(doc: &str) -> Arc<PlatformSpec> {
    Arc::new(serde_yaml_bw::from_str(doc).expect("platform parses"))
}

fn builder(platform: Arc<PlatformSpec>, repo: StaticRepo, out: &Path) -> GraphBuilder {
    GraphBuilder::new(platform, Arc::new(repo), Arc::new(OsFileSystem), out)
}

fn modules_by_id(stack_dir: &Path) -> HashMap<String, Value> {
    let raw = std::fs::read_to_string(stack_dir.join("modules.json")).expect("modules.json");
    let modules: Vec<Value> = serde_json::from_str(&raw).expect("modules parse");
    modules
        .into_iter()
        .map(|m| (m["id"].as_str().unwrap().to_string(), m))
        .collect()
}

#[tokio::test]
async fn builds_a_minimal_app_into_a_wired_stack() {
    let out = tempfile::tempdir().unwrap();
    let app = load_app(APP);
    let builder = builder(load_platform(PLATFORM), StaticRepo::standard(), out.path());

    let stack_dir = builder.apply(&app).await.expect("build succeeds");
    let modules = modules_by_id(&stack_dir);

    // Every intent materialized, infra exactly once, identities and image
    // synthesized for the service.
    for id in ["api", "api_image", "api_main_identity", "uploads", "main", "infra_vpc"] {
        assert!(modules.contains_key(id), "missing module '{id}'");
    }
    assert_eq!(modules.len(), 6);

    // Whole-token infra reference preserved the object binding; the
    // attribute lookup coerced to a module expression.
    let api = &modules["api"];
    assert_eq!(api["inputs"]["vpc"], json!({"@ref": "module.infra_vpc"}));
    assert_eq!(api["inputs"]["region"], json!("${var.region}"));
    assert_eq!(modules["uploads"]["inputs"]["vpc_id"], json!("${module.infra_vpc.id}"));

    // Explicit depends_on wired to the materialized infra module.
    let uploads_deps: Vec<&str> = modules["uploads"]["depends_on"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(uploads_deps, vec!["infra_vpc"]);

    // Access expansion is deterministic and sorted.
    assert_eq!(
        modules["uploads"]["inputs"]["suga"]["access"]["api"],
        json!(["read", "write"])
    );

    // The image module carries the plugin closure for the service.
    let args = &modules["api_image"]["inputs"]["args"];
    let definition: Value =
        serde_json::from_str(args["PLUGIN_DEFINITION"].as_str().unwrap()).unwrap();
    assert_eq!(definition["service"]["name"], json!("container-service"));
    assert_eq!(definition["resources"]["uploads"]["name"], json!("object-store"));

    // Entrypoint origins: one per target, typed, routes sorted by path.
    let origins = &modules["main"]["inputs"]["suga"]["origins"];
    assert_eq!(origins["api"]["type"], json!("service"));
    assert_eq!(origins["uploads"]["type"], json!("bucket"));
    assert_eq!(origins["api"]["routes"][0]["path"], json!("/api/"));
    assert_eq!(
        origins["api"]["domain_name"],
        json!("${module.api.domain_name}")
    );

    // Declared variables: the per-intent self.* name and the lazily
    // materialized platform variable.
    let variables = std::fs::read_to_string(stack_dir.join("variables.json")).unwrap();
    assert!(variables.contains("api_cpu"));
    assert!(variables.contains("region"));
}

#[tokio::test]
async fn repeated_builds_are_byte_identical() {
    let app = load_app(APP);
    let out_a = tempfile::tempdir().unwrap();
    let out_b = tempfile::tempdir().unwrap();

    let dir_a = builder(load_platform(PLATFORM), StaticRepo::standard(), out_a.path())
        .apply(&app)
        .await
        .expect("first build");
    let dir_b = builder(load_platform(PLATFORM), StaticRepo::standard(), out_b.path())
        .apply(&app)
        .await
        .expect("second build");

    for doc in ["stack.json", "modules.json", "variables.json", "outputs.json"] {
        let a = std::fs::read(dir_a.join(doc)).unwrap();
        let b = std::fs::read(dir_b.join(doc)).unwrap();
        assert_eq!(a, b, "{doc} differs between builds");
    }
}

#[tokio::test]
async fn unknown_subtype_reports_available_blueprints() {
    let doc = APP.replace(
        "  api:\n    container:",
        "  api:\n    subtype: exotic\n    container:",
    );
    let app = load_app(&doc);
    let out = tempfile::tempdir().unwrap();
    let err = builder(load_platform(PLATFORM), StaticRepo::standard(), out.path())
        .apply(&app)
        .await
        .unwrap_err();
    match err {
        SugaError::MissingBlueprint {
            intent,
            subtype,
            available,
            ..
        } => {
            assert_eq!(intent, "api");
            assert_eq!(subtype, "exotic");
            assert_eq!(available, vec!["default".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn interpolating_an_object_reference_is_rejected() {
    let platform = PLATFORM.replace("vpc: \"${infra.vpc}\"", "vpc: \"prefix-${infra.vpc}\"");
    let app = load_app(APP);
    let out = tempfile::tempdir().unwrap();
    let err = builder(load_platform(&platform), StaticRepo::standard(), out.path())
        .apply(&app)
        .await
        .unwrap_err();
    match err {
        SugaError::Reference(err) => {
            assert_eq!(err.cause, ReferenceCause::NonStringInterpolation);
            assert_eq!(err.token, "infra.vpc");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unknown_self_variable_names_the_available_ones() {
    let platform = PLATFORM.replace("cpu: \"${self.cpu}\"", "cpu: \"${self.cores}\"");
    let app = load_app(APP);
    let out = tempfile::tempdir().unwrap();
    let err = builder(load_platform(&platform), StaticRepo::standard(), out.path())
        .apply(&app)
        .await
        .unwrap_err();
    match err {
        SugaError::Reference(err) => match err.cause {
            ReferenceCause::UnknownVariable { available } => {
                assert_eq!(available, vec!["cpu".to_string()]);
            }
            other => panic!("unexpected cause: {other:?}"),
        },
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn missing_identity_is_reported_with_both_sides() {
    let platform = PLATFORM.replace(
        "    identities:\n      - name: main\n        plugin: {library: acme/aws, plugin: service-role}\n",
        "",
    );
    let app = load_app(APP);
    let out = tempfile::tempdir().unwrap();
    let err = builder(load_platform(&platform), StaticRepo::standard(), out.path())
        .apply(&app)
        .await
        .unwrap_err();
    match err {
        SugaError::MissingIdentity {
            plugin,
            required,
            provided,
        } => {
            assert_eq!(plugin, "container-service");
            assert_eq!(required, vec!["aws-role".to_string()]);
            assert!(provided.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn triggers_require_the_schedules_capability() {
    let doc = APP.replace(
        "        context: .\n",
        "        context: .\n    triggers:\n      nightly:\n        schedule: \"0 2 * * *\"\n",
    );
    let app = load_app(&doc);
    let out = tempfile::tempdir().unwrap();

    // With the capability the build passes...
    builder(load_platform(PLATFORM), StaticRepo::standard(), out.path())
        .apply(&app)
        .await
        .expect("schedules supported");

    // ...without it, CapabilityMismatch.
    let out = tempfile::tempdir().unwrap();
    let err = builder(
        load_platform(PLATFORM),
        StaticRepo::standard().without_schedules(),
        out.path(),
    )
    .apply(&app)
    .await
    .unwrap_err();
    match err {
        SugaError::CapabilityMismatch {
            service,
            capability,
            ..
        } => {
            assert_eq!(service, "api");
            assert_eq!(capability, "schedules");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unreferenced_infra_is_omitted() {
    let platform = PLATFORM.to_string()
        + "  unused:\n    plugin: {library: acme/aws, plugin: network}\n";
    let app = load_app(APP);
    let out = tempfile::tempdir().unwrap();
    let stack_dir = builder(load_platform(&platform), StaticRepo::standard(), out.path())
        .apply(&app)
        .await
        .expect("build succeeds");
    let modules = modules_by_id(&stack_dir);
    assert!(modules.contains_key("infra_vpc"));
    assert!(!modules.contains_key("infra_unused"));
}
