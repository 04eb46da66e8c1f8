use std::io::Cursor;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use suga::platform::{
    HttpRepository, PlatformSpec, PluginRepository, PluginSource,
};
use suga::pluginserver::{discover, router, DEV_VERSION};
use zip::ZipArchive;

fn write(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn seed_plugins(base: &Path) {
    write(
        &base.join("storage/manifest.yaml"),
        "\
name: object-store
inputs:
  bucket_name: {type: string, required: true}
outputs:
  domain_name: {type: string}
deployment:
  terraform: ./terraform
",
    );
    write(&base.join("storage/terraform/main.tf"), "resource {}\n");
    write(&base.join("storage/terraform/.terraform.lock"), "skip\n");
    write(
        &base.join("runtime/go.mod"),
        "module example.com/suga/storage-runtime\n\ngo 1.22\n",
    );
    write(&base.join("runtime/main.go"), "package main\n");
}

async fn serve(base: &Path) -> SocketAddr {
    let index = Arc::new(discover(base).expect("discovers"));
    let app = router(index);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

#[tokio::test]
async fn serves_manifests_under_both_namespaces() {
    let base = tempfile::tempdir().unwrap();
    seed_plugins(base.path());
    let addr = serve(base.path()).await;
    let client = reqwest::Client::new();

    for prefix in [
        "api/public/plugin_libraries/acme/dev",
        "api/teams/acme/plugin_libraries/dev",
    ] {
        let body: serde_json::Value = client
            .get(format!(
                "http://{addr}/{prefix}/versions/0.0.1/plugins/object-store"
            ))
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("json");
        assert_eq!(body["manifest"]["name"], "object-store");
    }

    let missing = client
        .get(format!(
            "http://{addr}/api/public/plugin_libraries/acme/dev/versions/0.0.1/plugins/ghost"
        ))
        .send()
        .await
        .expect("request");
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn streams_terraform_module_zips() {
    let base = tempfile::tempdir().unwrap();
    seed_plugins(base.path());
    let addr = serve(base.path()).await;

    let response = reqwest::get(format!("http://{addr}/terraform-modules/object-store.zip"))
        .await
        .expect("request");
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/zip"
    );
    let bytes = response.bytes().await.unwrap();
    let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert!(names.contains(&"main.tf".to_string()));
    assert!(!names.iter().any(|n| n.contains(".terraform.lock")));
}

#[tokio::test]
async fn speaks_the_module_proxy_protocol() {
    let base = tempfile::tempdir().unwrap();
    seed_plugins(base.path());
    let addr = serve(base.path()).await;
    let client = reqwest::Client::new();
    let module = "example.com/suga/storage-runtime";

    let list = client
        .get(format!("http://{addr}/{module}/@v/list"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(list, format!("{DEV_VERSION}\n"));

    let info: serde_json::Value = client
        .get(format!("http://{addr}/{module}/@v/{DEV_VERSION}.info"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["Version"], DEV_VERSION);
    assert!(info["Time"].is_string());

    let latest: serde_json::Value = client
        .get(format!("http://{addr}/{module}/@latest"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(latest, info);

    let module_file = client
        .get(format!("http://{addr}/{module}/@v/{DEV_VERSION}.mod"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(module_file.starts_with("module example.com/suga/storage-runtime"));

    let bytes = client
        .get(format!("http://{addr}/{module}/@v/{DEV_VERSION}.zip"))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert!(names.contains(&format!("{module}@{DEV_VERSION}/main.go")));

    let unknown = client
        .get(format!("http://{addr}/example.com/ghost/@v/list"))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn http_repository_rewrites_relative_terraform_paths() {
    let base = tempfile::tempdir().unwrap();
    seed_plugins(base.path());
    let addr = serve(base.path()).await;

    let platform: PlatformSpec = serde_yaml_bw::from_str(&format!(
        "\
name: local
libraries:
  acme/dev:
    version: \"0.0.1\"
    server_url: http://{addr}
"
    ))
    .expect("platform parses");
    let repo = HttpRepository::new(Arc::new(platform), format!("http://{addr}"));
    let manifest = repo
        .get_resource_plugin(&PluginSource {
            library: "acme/dev".into(),
            plugin: "object-store".into(),
        })
        .await
        .expect("lookup succeeds");

    let rewritten = format!("http://{addr}/terraform-modules/object-store.zip");
    assert_eq!(manifest.deployment.terraform, rewritten);

    // The rewritten URL actually serves the module bundle.
    let response = reqwest::get(&rewritten).await.expect("zip fetch");
    assert!(response.status().is_success());
}
