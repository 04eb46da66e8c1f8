use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::schema::{Application, EntrypointIntent};

use super::stack::module_attr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginKind {
    Service,
    Bucket,
}

#[derive(Debug, Clone, Serialize)]
pub struct OriginRoute {
    pub path: String,
    pub base_path: String,
}

/// One upstream of an entrypoint: every route pointing at the same target
/// shares an origin.
#[derive(Debug, Clone, Serialize)]
pub struct Origin {
    #[serde(rename = "type")]
    pub kind: OriginKind,
    /// Module id of the target.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    pub routes: Vec<OriginRoute>,
}

/// Looks up exposed output names for an origin target.
pub trait TargetInfo {
    fn exposes_domain_name(&self, target: &str) -> bool;
    fn exposed_outputs(&self, target: &str) -> Vec<String>;
}

/// Folds an entrypoint's routes into per-target origins. Routes iterate in
/// sorted path order, which also breaks ties between duplicate targets, so
/// the fold is deterministic.
pub fn fold_origins(
    app: &Application,
    entrypoint: &EntrypointIntent,
    info: &dyn TargetInfo,
) -> BTreeMap<String, Origin> {
    let mut origins: BTreeMap<String, Origin> = BTreeMap::new();

    for (path, route) in &entrypoint.routes {
        let target = &route.target_name;
        let kind = if app.services.contains_key(target) {
            OriginKind::Service
        } else {
            OriginKind::Bucket
        };
        let origin = origins.entry(target.clone()).or_insert_with(|| Origin {
            kind,
            id: target.clone(),
            domain_name: info
                .exposes_domain_name(target)
                .then(|| module_attr(target, &["domain_name".to_string()])),
            resources: info.exposed_outputs(target),
            routes: Vec::new(),
        });
        origin.routes.push(OriginRoute {
            path: path.clone(),
            base_path: route.base_path.clone().unwrap_or_else(|| "/".to_string()),
        });
    }

    origins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    struct NoOutputs;

    impl TargetInfo for NoOutputs {
        fn exposes_domain_name(&self, _target: &str) -> bool {
            false
        }

        fn exposed_outputs(&self, _target: &str) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn duplicate_targets_share_an_origin() {
        let doc = "\
name: app
target: acme/platform@1
services:
  api:
    container:
      image: {id: img}
entrypoints:
  web:
    routes:
      /api/:
        target_name: api
      /v2/:
        target_name: api
        base_path: /api/v2/
";
        let (app, report) = schema::load(doc).expect("parses");
        assert!(report.ok(), "{report}");
        let origins = fold_origins(&app, &app.entrypoints["web"], &NoOutputs);
        assert_eq!(origins.len(), 1);
        let origin = &origins["api"];
        assert_eq!(origin.kind, OriginKind::Service);
        assert_eq!(origin.routes.len(), 2);
        // BTreeMap iteration already sorted the paths.
        assert_eq!(origin.routes[0].path, "/api/");
        assert_eq!(origin.routes[0].base_path, "/");
        assert_eq!(origin.routes[1].base_path, "/api/v2/");
    }
}
