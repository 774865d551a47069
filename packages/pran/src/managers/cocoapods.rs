use async_trait::async_trait;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{project_dir, project_name, read_text, resolve_each, split_parenthesized, ResolverContext};
use crate::error::ResolutionError;
use crate::graph::DependencyGraph;
use crate::types::{Dependency, Resolution, Resolver, Scope, UNSPECIFIED_VERSION};

const LOCKFILE: &str = "Podfile.lock";

/// Resolves CocoaPods projects from `Podfile.lock`.
pub struct CocoaPodsResolver {
    context: ResolverContext,
}

impl CocoaPodsResolver {
    pub fn new(context: &ResolverContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    async fn resolve_file(&self, definition_file: PathBuf) -> Resolution {
        let dir = project_dir(&definition_file);
        let lockfile = if definition_file.file_name().is_some_and(|name| name == "Podfile") {
            let lockfile = dir.join(LOCKFILE);
            if !lockfile.is_file() {
                return Err(ResolutionError::unsupported(
                    &definition_file,
                    "a Podfile without Podfile.lock has no resolved versions; run `pod install` first",
                ));
            }
            lockfile
        } else {
            definition_file.clone()
        };

        let content = read_text(&lockfile).await?;
        let (graph, roots) = parse_podfile_lock(&lockfile, &content)?;

        Ok(Dependency::new(project_name(dir), UNSPECIFIED_VERSION, Scope::Production)
            .with_children(graph.tree(&roots)))
    }
}

#[async_trait]
impl Resolver for CocoaPodsResolver {
    async fn resolve(&self, definition_files: &[PathBuf]) -> BTreeMap<PathBuf, Resolution> {
        resolve_each(definition_files, self.context.jobs, |file| self.resolve_file(file)).await
    }
}

/// Read the `PODS` graph and the `DEPENDENCIES` roots of a Podfile.lock.
pub fn parse_podfile_lock(path: &Path, content: &str) -> Result<(DependencyGraph, Vec<String>), ResolutionError> {
    let document: Value = serde_yaml::from_str(content).map_err(|e| ResolutionError::invalid_file(path, e))?;
    let pods = document
        .get("PODS")
        .and_then(Value::as_sequence)
        .ok_or_else(|| ResolutionError::invalid_file(path, "missing PODS section"))?;

    let mut graph = DependencyGraph::new();
    for pod in pods {
        match pod {
            Value::String(entry) => {
                let (name, version) = split_parenthesized(entry);
                graph.add_package(name, version.unwrap_or(UNSPECIFIED_VERSION), Vec::new());
            }
            Value::Mapping(mapping) => {
                for (entry, dependencies) in mapping {
                    let Some(entry) = entry.as_str() else { continue };
                    let (name, version) = split_parenthesized(entry);
                    let dependencies = dependencies
                        .as_sequence()
                        .map(|dependencies| {
                            dependencies
                                .iter()
                                .filter_map(Value::as_str)
                                .map(|dependency| split_parenthesized(dependency).0.to_string())
                                .collect()
                        })
                        .unwrap_or_default();
                    graph.add_package(name, version.unwrap_or(UNSPECIFIED_VERSION), dependencies);
                }
            }
            _ => {}
        }
    }

    let roots = document
        .get("DEPENDENCIES")
        .and_then(Value::as_sequence)
        .map(|dependencies| {
            dependencies
                .iter()
                .filter_map(Value::as_str)
                .map(|dependency| split_parenthesized(dependency).0.to_string())
                .collect()
        })
        .unwrap_or_default();

    Ok((graph, roots))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    const LOCK: &str = r#"PODS:
  - AFNetworking (3.1.0):
    - AFNetworking/NSURLSession (= 3.1.0)
    - AFNetworking/Reachability (= 3.1.0)
  - AFNetworking/NSURLSession (3.1.0):
    - AFNetworking/Reachability
  - AFNetworking/Reachability (3.1.0)
  - SwiftyJSON (4.0.0)
  - LocalKit (0.1.0)

DEPENDENCIES:
  - AFNetworking (~> 3.0)
  - SwiftyJSON
  - LocalKit (from `../LocalKit`)

SPEC CHECKSUMS:
  AFNetworking: 5e0e199f73d8626b11e79750991f5d173d1f8b67

PODFILE CHECKSUM: 0123456789abcdef

COCOAPODS: 1.5.3
"#;

    #[test]
    fn test_parse_podfile_lock() {
        let (graph, roots) = parse_podfile_lock(Path::new("Podfile.lock"), LOCK).unwrap();

        assert_eq!(roots, vec!["AFNetworking", "SwiftyJSON", "LocalKit"]);
        assert_eq!(graph.len(), 5);

        let tree = graph.tree(&roots);
        assert_eq!(tree[0].to_string(), "AFNetworking@3.1.0");
        assert_eq!(tree[0].children().len(), 2);
        assert_eq!(tree[0].depth(), 3);
        assert_eq!(tree[2].to_string(), "LocalKit@0.1.0");
    }

    #[test]
    fn test_lockfile_without_pods_is_invalid() {
        let result = parse_podfile_lock(Path::new("Podfile.lock"), "COCOAPODS: 1.5.3\n");
        assert!(matches!(result, Err(ResolutionError::InvalidDefinitionFile { .. })));
    }

    #[tokio::test]
    async fn test_podfile_needs_lockfile() {
        let temp_dir = TempDir::new().unwrap();
        let podfile = temp_dir.path().join("Podfile");
        fs::write(&podfile, "pod 'SwiftyJSON'\n").unwrap();

        let resolver = CocoaPodsResolver::new(&ResolverContext::default());
        let results = resolver.resolve(&[podfile.clone()]).await;
        assert!(matches!(results[&podfile], Err(ResolutionError::UnsupportedFile { .. })));

        fs::write(temp_dir.path().join("Podfile.lock"), LOCK).unwrap();
        let results = resolver.resolve(&[podfile.clone()]).await;
        assert_eq!(results[&podfile].as_ref().unwrap().children().len(), 3);
    }
}
