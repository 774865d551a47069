use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{project_dir, project_name, read_json, read_text, resolve_each, ResolverContext};
use crate::error::ResolutionError;
use crate::tool::{NPM, YARN};
use crate::types::{Dependency, Resolution, Resolver, Scope, UNSPECIFIED_VERSION};

/// Resolves npm projects.
///
/// `npm-shrinkwrap.json` is read directly. A `yarn.lock` is handed to
/// `yarn list`, a bare `package.json` to `npm ls`; both run in the file's
/// directory. yarn trees carry no scope information, so everything they
/// report is marked production.
pub struct NpmResolver {
    context: ResolverContext,
}

impl NpmResolver {
    pub fn new(context: &ResolverContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    async fn resolve_file(&self, definition_file: PathBuf) -> Resolution {
        match definition_file.file_name().and_then(|name| name.to_str()) {
            Some("npm-shrinkwrap.json") => parse_shrinkwrap(&definition_file, &read_json(&definition_file).await?),
            Some("yarn.lock") => self.resolve_yarn(&definition_file).await,
            Some("package.json") => self.resolve_npm_ls(&definition_file).await,
            _ => resolve_other(&definition_file).await,
        }
    }

    async fn resolve_yarn(&self, lockfile: &Path) -> Resolution {
        let dir = project_dir(lockfile);
        let stdout = self
            .context
            .runner
            .run(&YARN, dir, &["list", "--json", "--no-progress"])
            .await?;

        let document = yarn_tree_document(&stdout)?;
        let children = parse_yarn_trees(&document)?;
        let (name, version) = package_identity(dir).await;

        Ok(Dependency::new(name, version, Scope::Production).with_children(children))
    }

    async fn resolve_npm_ls(&self, manifest: &Path) -> Resolution {
        let dir = project_dir(manifest);
        let manifest_json = read_json(manifest).await?;
        let tree = self
            .context
            .runner
            .run_json_report(&NPM, dir, &["ls", "--json", "--all"])
            .await?;

        // npm lists missing, extraneous or invalid packages here and exits with 1.
        for problem in tree.get("problems").and_then(Value::as_array).into_iter().flatten() {
            warn!("npm ls in {}: {}", dir.display(), problem.as_str().unwrap_or_default());
        }

        Ok(parse_npm_tree(&tree, &manifest_json, dir))
    }
}

#[async_trait]
impl Resolver for NpmResolver {
    async fn resolve(&self, definition_files: &[PathBuf]) -> BTreeMap<PathBuf, Resolution> {
        resolve_each(definition_files, self.context.jobs, |file| self.resolve_file(file)).await
    }
}

/// Files given explicitly under another name are accepted when they hold a
/// shrinkwrap-shaped JSON object.
async fn resolve_other(path: &Path) -> Resolution {
    let content = read_text(path).await?;
    match serde_json::from_str::<Value>(&content) {
        Ok(document) if document.is_object() => parse_shrinkwrap(path, &document),
        _ => Err(ResolutionError::unsupported(
            path,
            "expected npm-shrinkwrap.json, yarn.lock or package.json",
        )),
    }
}

/// Build the root of a shrinkwrap lockfile with its locked packages as direct children.
///
/// Understands both the `dependencies` map of older lockfiles and the
/// `packages` map of lockfile version 3. The lockfile does not keep the tree
/// shape, so every package is a production child of the root.
pub fn parse_shrinkwrap(path: &Path, document: &Value) -> Resolution {
    let Some(object) = document.as_object() else {
        return Err(ResolutionError::invalid_file(path, "expected a JSON object"));
    };

    let name = object
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| project_name(project_dir(path)));
    let version = object
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or(UNSPECIFIED_VERSION);

    let children = match (object.get("dependencies"), object.get("packages")) {
        (Some(Value::Object(dependencies)), _) => locked_dependencies(dependencies),
        (_, Some(Value::Object(packages))) => locked_packages(packages),
        (Some(other), _) if !other.is_null() => {
            return Err(ResolutionError::invalid_file(path, "'dependencies' is not an object"))
        }
        _ => Vec::new(),
    };

    Ok(Dependency::new(name, version, Scope::Production).with_children(children))
}

fn locked_dependencies(dependencies: &Map<String, Value>) -> Vec<Dependency> {
    dependencies
        .iter()
        .filter_map(|(name, entry)| match entry.get("version").and_then(Value::as_str) {
            Some(version) => Some(Dependency::new(name.as_str(), version, Scope::Production)),
            None => {
                debug!("Locked dependency {} has no version, skipping", name);
                None
            }
        })
        .collect()
}

fn locked_packages(packages: &Map<String, Value>) -> Vec<Dependency> {
    packages
        .iter()
        .filter_map(|(key, entry)| {
            let name = key.strip_prefix("node_modules/")?;
            if name.contains("/node_modules/") {
                return None;
            }
            let version = entry.get("version").and_then(Value::as_str)?;
            Some(Dependency::new(name, version, Scope::Production))
        })
        .collect()
}

/// Find the tree document in `yarn list --json` output, which may be preceded
/// by other newline-delimited JSON events.
fn yarn_tree_document(stdout: &str) -> Result<Value, ResolutionError> {
    if let Ok(document) = serde_json::from_str::<Value>(stdout) {
        return Ok(document);
    }

    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        .find(|event| event.pointer("/data/trees").is_some())
        .ok_or_else(|| ResolutionError::malformed("yarn did not print a dependency tree"))
}

/// Turn the `data.trees` of a yarn tree document into dependencies.
pub fn parse_yarn_trees(document: &Value) -> Result<Vec<Dependency>, ResolutionError> {
    let trees = document
        .pointer("/data/trees")
        .and_then(Value::as_array)
        .ok_or_else(|| ResolutionError::malformed("missing 'data.trees' array"))?;

    trees.iter().map(parse_yarn_node).collect()
}

fn parse_yarn_node(node: &Value) -> Result<Dependency, ResolutionError> {
    let spec = node
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ResolutionError::malformed("tree node without 'name'"))?;
    let (artifact, version) = split_package_spec(spec)
        .ok_or_else(|| ResolutionError::malformed(format!("'{}' is not of the form <name>@<version>", spec)))?;

    let children = match node.get("children") {
        Some(Value::Array(children)) => children.iter().map(parse_yarn_node).collect::<Result<Vec<_>, _>>()?,
        _ => Vec::new(),
    };

    Ok(Dependency::new(artifact, version, Scope::Production).with_children(children))
}

/// Split `name@version`. The `@` opening a scoped name such as `@babel/core` is not a separator.
pub fn split_package_spec(spec: &str) -> Option<(&str, &str)> {
    let offset = usize::from(spec.starts_with('@'));
    let at = spec[offset..].find('@')? + offset;
    let (artifact, version) = (&spec[..at], &spec[at + 1..]);
    if artifact.is_empty() || version.is_empty() {
        return None;
    }
    Some((artifact, version))
}

/// Name and version from the `package.json` next to a lockfile, falling back
/// to the directory name.
async fn package_identity(dir: &Path) -> (String, String) {
    let manifest = read_json(&dir.join("package.json")).await.ok();
    let field = |key: &str| {
        manifest
            .as_ref()
            .and_then(|manifest| manifest.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    (
        field("name").unwrap_or_else(|| project_name(dir)),
        field("version").unwrap_or_else(|| UNSPECIFIED_VERSION.to_string()),
    )
}

/// Turn `npm ls --json` output into a tree. Top-level packages listed under
/// `devDependencies` in the manifest make their whole subtree development scoped.
pub fn parse_npm_tree(tree: &Value, manifest: &Value, dir: &Path) -> Dependency {
    let dev_dependencies: HashSet<&str> = manifest
        .get("devDependencies")
        .and_then(Value::as_object)
        .map(|dev| dev.keys().map(String::as_str).collect())
        .unwrap_or_default();

    let name = tree
        .get("name")
        .or_else(|| manifest.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| project_name(dir));
    let version = tree
        .get("version")
        .or_else(|| manifest.get("version"))
        .and_then(Value::as_str)
        .unwrap_or(UNSPECIFIED_VERSION);

    let children = npm_dependencies(tree)
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

fn npm_dependencies(node: &Value) -> Vec<Dependency> {
    let Some(dependencies) = node.get("dependencies").and_then(Value::as_object) else {
        return Vec::new();
    };

    dependencies
        .iter()
        .filter_map(|(name, entry)| {
            let missing = entry.get("missing").and_then(Value::as_bool).unwrap_or(false);
            match entry.get("version").and_then(Value::as_str) {
                Some(version) if !missing => Some(
                    Dependency::new(name.as_str(), version, Scope::Production)
                        .with_children(npm_dependencies(entry)),
                ),
                _ => {
                    debug!("{} is not installed, skipping", name);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_shrinkwrap() {
        let document = json!({"name":"app","version":"1.0.0","dependencies":{"left-pad":{"version":"1.3.0"}}});
        let root = parse_shrinkwrap(Path::new("/p/npm-shrinkwrap.json"), &document).unwrap();

        assert_eq!(root.artifact(), "app");
        assert_eq!(root.version(), "1.0.0");
        assert_eq!(
            root.children(),
            &[Dependency::new("left-pad", "1.3.0", Scope::Production)]
        );
    }

    #[test]
    fn test_parse_shrinkwrap_is_flat() {
        let document = json!({
            "name": "app",
            "version": "1.0.0",
            "dependencies": {
                "express": {"version": "4.16.0", "dev": true, "requires": {"accepts": "~1.3.5"}},
                "accepts": {"version": "1.3.5"},
                "broken": {"resolved": "https://example.com/broken.tgz"}
            }
        });
        let root = parse_shrinkwrap(Path::new("/p/npm-shrinkwrap.json"), &document).unwrap();

        assert_eq!(root.depth(), 2);
        assert_eq!(
            root.packages().into_iter().collect::<Vec<_>>(),
            vec![("accepts", "1.3.5"), ("express", "4.16.0")]
        );
        assert!(root.children().iter().all(|c| c.scope() == Scope::Production));
    }

    #[test]
    fn test_parse_lockfile_v3_packages() {
        let document = json!({
            "name": "app",
            "version": "2.0.0",
            "lockfileVersion": 3,
            "packages": {
                "": {"name": "app", "version": "2.0.0"},
                "node_modules/@types/node": {"version": "20.1.0"},
                "node_modules/chalk": {"version": "5.3.0"},
                "node_modules/chalk/node_modules/ansi-styles": {"version": "6.2.1"}
            }
        });
        let root = parse_shrinkwrap(Path::new("/p/npm-shrinkwrap.json"), &document).unwrap();
        let children: Vec<_> = root.children().iter().map(|c| c.to_string()).collect();
        assert_eq!(children, vec!["@types/node@20.1.0", "chalk@5.3.0"]);
    }

    #[test]
    fn test_shrinkwrap_without_name_uses_directory() {
        let root = parse_shrinkwrap(Path::new("/work/webapp/npm-shrinkwrap.json"), &json!({})).unwrap();
        assert_eq!(root.artifact(), "webapp");
        assert_eq!(root.version(), UNSPECIFIED_VERSION);
        assert!(root.children().is_empty());
    }

    #[test]
    fn test_shrinkwrap_with_bad_dependencies() {
        let result = parse_shrinkwrap(Path::new("/p/npm-shrinkwrap.json"), &json!({"dependencies": []}));
        assert!(matches!(result, Err(ResolutionError::InvalidDefinitionFile { .. })));
    }

    #[test]
    fn test_parse_yarn_trees() {
        let document = json!({"data":{"trees":[{"name":"lodash@4.17.0","children":[]}]}});
        let trees = parse_yarn_trees(&document).unwrap();
        assert_eq!(trees, vec![Dependency::new("lodash", "4.17.0", Scope::Production)]);
    }

    #[test]
    fn test_parse_nested_yarn_trees() {
        let document = json!({
            "type": "tree",
            "data": {
                "type": "list",
                "trees": [
                    {"name": "@babel/core@7.1.0", "children": [
                        {"name": "@babel/types@7.1.0", "color": "dim", "shadow": true},
                        {"name": "debug@3.2.5", "children": [{"name": "ms@2.1.1"}]}
                    ]},
                    {"name": "left-pad@1.3.0"}
                ]
            }
        });
        let trees = parse_yarn_trees(&document).unwrap();

        assert_eq!(trees.len(), 2);
        assert_eq!(trees[0].artifact(), "@babel/core");
        assert_eq!(trees[0].version(), "7.1.0");
        assert_eq!(trees[0].find("ms").unwrap().version(), "2.1.1");
        assert_eq!(trees[0].node_count(), 4);
    }

    #[test]
    fn test_yarn_name_without_version_is_malformed() {
        let document = json!({"data":{"trees":[{"name":"lodash"}]}});
        assert!(matches!(
            parse_yarn_trees(&document),
            Err(ResolutionError::MalformedOutput { .. })
        ));
    }

    #[test]
    fn test_yarn_document_without_trees_is_malformed() {
        assert!(matches!(
            parse_yarn_trees(&json!({"type": "info", "data": "nothing here"})),
            Err(ResolutionError::MalformedOutput { .. })
        ));
    }

    #[test]
    fn test_yarn_tree_is_found_among_events() {
        let stdout = "{\"type\":\"warning\",\"data\":\"package.json: No license field\"}\n\
                      {\"type\":\"tree\",\"data\":{\"type\":\"list\",\"trees\":[{\"name\":\"ms@2.1.1\"}]}}\n";
        let document = yarn_tree_document(stdout).unwrap();
        assert_eq!(parse_yarn_trees(&document).unwrap()[0].artifact(), "ms");
        assert!(yarn_tree_document("warning only\n").is_err());
    }

    #[test]
    fn test_split_package_spec() {
        assert_eq!(split_package_spec("lodash@4.17.0"), Some(("lodash", "4.17.0")));
        assert_eq!(split_package_spec("@scope/pkg@1.0.0"), Some(("@scope/pkg", "1.0.0")));
        assert_eq!(split_package_spec("a@npm:b@1.0.0"), Some(("a", "npm:b@1.0.0")));
        assert_eq!(split_package_spec("lodash"), None);
        assert_eq!(split_package_spec("@scope/pkg"), None);
        assert_eq!(split_package_spec("lodash@"), None);
    }

    #[test]
    fn test_parse_npm_tree_marks_dev_subtrees() {
        let manifest = json!({
            "name": "app",
            "dependencies": {"express": "^4.16.0"},
            "devDependencies": {"mocha": "^5.0.0"}
        });
        let tree = json!({
            "name": "app",
            "version": "1.2.3",
            "dependencies": {
                "express": {"version": "4.16.0", "dependencies": {"accepts": {"version": "1.3.5"}}},
                "mocha": {"version": "5.2.0", "dependencies": {"debug": {"version": "3.1.0"}}},
                "left-pad": {"required": "^1.0.0", "missing": true}
            }
        });
        let root = parse_npm_tree(&tree, &manifest, Path::new("/p"));

        assert_eq!(root.to_string(), "app@1.2.3");
        assert_eq!(root.children().len(), 2);
        assert_eq!(root.find("accepts").unwrap().scope(), Scope::Production);
        assert_eq!(root.find("mocha").unwrap().scope(), Scope::Development);
        assert_eq!(root.find("debug").unwrap().scope(), Scope::Development);
        assert!(root.find("left-pad").is_none());
    }

    #[tokio::test]
    async fn test_explicit_shrinkwrap_shaped_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("locked-deps.json");
        fs::write(&path, r#"{"name":"tool","version":"0.1.0","dependencies":{"ms":{"version":"2.1.1"}}}"#).unwrap();

        let root = resolve_other(&path).await.unwrap();
        assert_eq!(root.children()[0].to_string(), "ms@2.1.1");
    }

    #[tokio::test]
    async fn test_explicit_unknown_file_is_unsupported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("deps.txt");
        fs::write(&path, "left-pad 1.3.0\n").unwrap();

        assert!(matches!(
            resolve_other(&path).await,
            Err(ResolutionError::UnsupportedFile { .. })
        ));
    }

    #[cfg(unix)]
    mod delegated {
        use super::*;
        use pretty_assertions::assert_eq;
        use crate::tool::{ToolCommand, ToolRunner};
        use std::time::Duration;

        fn context_printing(tool: &str, script: &str) -> ResolverContext {
            let runner = ToolRunner::new(Duration::from_secs(10)).with_override(
                tool,
                ToolCommand {
                    program: "sh".to_string(),
                    args: vec!["-c".to_string(), script.to_string()],
                },
            );
            ResolverContext::new(runner, 2)
        }

        #[tokio::test]
        async fn test_yarn_lock_delegates_to_yarn() {
            let temp_dir = TempDir::new().unwrap();
            let output = temp_dir.path().join("yarn-output.json");
            fs::write(&output, r#"{"type":"tree","data":{"type":"list","trees":[{"name":"lodash@4.17.0","children":[]}]}}"#).unwrap();
            fs::write(temp_dir.path().join("package.json"), r#"{"name":"shop","version":"3.0.0"}"#).unwrap();
            let lockfile = temp_dir.path().join("yarn.lock");
            fs::write(&lockfile, "# yarn lockfile v1\n").unwrap();

            let resolver = NpmResolver::new(&context_printing("yarn", &format!("cat '{}'", output.display())));
            let results = resolver.resolve(&[lockfile.clone()]).await;

            let root = results[&lockfile].as_ref().unwrap();
            assert_eq!(root.to_string(), "shop@3.0.0");
            assert_eq!(root.children(), &[Dependency::new("lodash", "4.17.0", Scope::Production)]);
        }

        #[tokio::test]
        async fn test_failing_yarn_leaves_other_files_alone() {
            let temp_dir = TempDir::new().unwrap();
            let yarn_dir = temp_dir.path().join("a");
            let shrinkwrap_dir = temp_dir.path().join("b");
            fs::create_dir_all(&yarn_dir).unwrap();
            fs::create_dir_all(&shrinkwrap_dir).unwrap();
            let lockfile = yarn_dir.join("yarn.lock");
            fs::write(&lockfile, "").unwrap();
            let shrinkwrap = shrinkwrap_dir.join("npm-shrinkwrap.json");
            fs::write(&shrinkwrap, r#"{"name":"b","version":"1.0.0","dependencies":{}}"#).unwrap();

            let resolver = NpmResolver::new(&context_printing("yarn", "exit 1"));
            let results = resolver.resolve(&[lockfile.clone(), shrinkwrap.clone()]).await;

            assert_eq!(
                results[&lockfile],
                Err(ResolutionError::ExternalToolFailed {
                    exit_code: Some(1),
                    stderr: String::new(),
                })
            );
            assert_eq!(results[&shrinkwrap].as_ref().unwrap().to_string(), "b@1.0.0");
        }

        #[tokio::test]
        async fn test_package_json_delegates_to_npm_ls() {
            let temp_dir = TempDir::new().unwrap();
            let output = temp_dir.path().join("npm-output.json");
            fs::write(&output, r#"{"name":"site","version":"0.0.1","dependencies":{"mocha":{"version":"5.2.0"}}}"#).unwrap();
            let manifest = temp_dir.path().join("package.json");
            fs::write(&manifest, r#"{"name":"site","devDependencies":{"mocha":"^5.0.0"}}"#).unwrap();

            let resolver = NpmResolver::new(&context_printing("npm", &format!("cat '{}'", output.display())));
            let results = resolver.resolve(&[manifest.clone()]).await;

            let root = results[&manifest].as_ref().unwrap();
            assert_eq!(root.children()[0].scope(), Scope::Development);
        }

        #[tokio::test]
        async fn test_npm_ls_problems_keep_the_tree() {
            let temp_dir = TempDir::new().unwrap();
            let output = temp_dir.path().join("npm-output.json");
            fs::write(
                &output,
                r#"{
                    "name": "site",
                    "version": "0.0.1",
                    "problems": ["missing: left-pad@^1.0.0, required by site@0.0.1"],
                    "dependencies": {
                        "ms": {"version": "2.1.1"},
                        "left-pad": {"required": "^1.0.0", "missing": true}
                    }
                }"#,
            )
            .unwrap();
            let manifest = temp_dir.path().join("package.json");
            fs::write(&manifest, r#"{"name":"site","version":"0.0.1"}"#).unwrap();

            let script = format!("cat '{}'; exit 1", output.display());
            let resolver = NpmResolver::new(&context_printing("npm", &script));
            let results = resolver.resolve(&[manifest.clone()]).await;

            let root = results[&manifest].as_ref().unwrap();
            assert_eq!(root.children(), &[Dependency::new("ms", "2.1.1", Scope::Production)]);
        }

        #[tokio::test]
        async fn test_npm_ls_failure_without_tree() {
            let temp_dir = TempDir::new().unwrap();
            let manifest = temp_dir.path().join("package.json");
            fs::write(&manifest, r#"{"name":"site"}"#).unwrap();

            let resolver = NpmResolver::new(&context_printing("npm", "echo 'npm ERR! code ELSPROBLEMS' >&2; exit 1"));
            let results = resolver.resolve(&[manifest.clone()]).await;

            assert_eq!(
                results[&manifest],
                Err(ResolutionError::ExternalToolFailed {
                    exit_code: Some(1),
                    stderr: "npm ERR! code ELSPROBLEMS".to_string(),
                })
            );
        }
    }
}
