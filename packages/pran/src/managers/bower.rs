use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use super::{project_dir, project_name, resolve_each, ResolverContext};
use crate::tool::BOWER;
use crate::types::{Dependency, Resolution, Resolver, Scope, UNSPECIFIED_VERSION};

/// Resolves `bower.json` through `bower list --json --offline`.
pub struct BowerResolver {
    context: ResolverContext,
}

impl BowerResolver {
    pub fn new(context: &ResolverContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    async fn resolve_file(&self, manifest: PathBuf) -> Resolution {
        let dir = project_dir(&manifest);
        let tree = self
            .context
            .runner
            .run_json(&BOWER, dir, &["list", "--json", "--offline"])
            .await?;
        Ok(parse_bower_tree(&tree, dir))
    }
}

#[async_trait]
impl Resolver for BowerResolver {
    async fn resolve(&self, definition_files: &[PathBuf]) -> BTreeMap<PathBuf, Resolution> {
        resolve_each(definition_files, self.context.jobs, |file| self.resolve_file(file)).await
    }
}

/// Turn `bower list --json` output into a tree. Packages named under the
/// root's `devDependencies` make their subtree development scoped.
pub fn parse_bower_tree(tree: &Value, dir: &Path) -> Dependency {
    let meta = tree.get("pkgMeta");
    let dev_dependencies: HashSet<&str> = meta
        .and_then(|meta| meta.get("devDependencies"))
        .and_then(Value::as_object)
        .map(|dev| dev.keys().map(String::as_str).collect())
        .unwrap_or_default();

    let name = meta
        .and_then(|meta| meta.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| project_name(dir));
    let version = meta
        .and_then(|meta| meta.get("version"))
        .and_then(Value::as_str)
        .unwrap_or(UNSPECIFIED_VERSION);

    let children = bower_dependencies(tree)
        .into_iter()
        .map(|child| {
            if dev_dependencies.contains(child.artifact()) {
                child.with_scope(Scope::Development)
            } else {
                child
            }
        })
        .collect();

    Dependency::new(name, version, Scope::Production).with_children(children)
}

fn bower_dependencies(node: &Value) -> Vec<Dependency> {
    let Some(dependencies) = node.get("dependencies").and_then(Value::as_object) else {
        return Vec::new();
    };

    dependencies
        .iter()
        .map(|(key, entry)| {
            let name = entry
                .pointer("/pkgMeta/name")
                .and_then(Value::as_str)
                .unwrap_or(key.as_str());
            // Packages that are not installed only have the requested range.
            let version = entry
                .pointer("/pkgMeta/version")
                .or_else(|| entry.pointer("/endpoint/target"))
                .and_then(Value::as_str)
                .unwrap_or(UNSPECIFIED_VERSION);

            Dependency::new(name, version, Scope::Production).with_children(bower_dependencies(entry))
        })
        .collect()
}
