use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{project_dir, resolve_each, ResolverContext};
use crate::error::ResolutionError;
use crate::graph::DependencyGraph;
use crate::tool::MAVEN;
use crate::types::{Resolution, Resolver, Scope};

/// Resolves `pom.xml` with the dependency plugin's tree in trivial graph format.
pub struct MavenResolver {
    context: ResolverContext,
}

impl MavenResolver {
    pub fn new(context: &ResolverContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    async fn resolve_file(&self, pom: PathBuf) -> Resolution {
        let dir = project_dir(&pom);
        let output = tempfile::Builder::new()
            .prefix("pran-maven-")
            .suffix(".tgf")
            .tempfile()
            .map_err(|e| ResolutionError::TaskFailed {
                details: format!("Failed to create output file: {}", e),
            })?;

        let output_arg = format!("-DoutputFile={}", output.path().display());
        let pom_arg = pom.to_string_lossy().to_string();
        self.context
            .runner
            .run(
                &MAVEN,
                dir,
                &[
                    "dependency:tree",
                    "-DoutputType=tgf",
                    output_arg.as_str(),
                    "-N",
                    "-B",
                    "-q",
                    "-f",
                    pom_arg.as_str(),
                ],
            )
            .await?;

        let tgf = tokio::fs::read_to_string(output.path())
            .await
            .map_err(|e| ResolutionError::malformed(format!("Maven did not write a dependency tree: {}", e)))?;
        parse_tgf(&tgf)
    }
}

#[async_trait]
impl Resolver for MavenResolver {
    async fn resolve(&self, definition_files: &[PathBuf]) -> BTreeMap<PathBuf, Resolution> {
        resolve_each(definition_files, self.context.jobs, |file| self.resolve_file(file)).await
    }
}

/// Parse a TGF dependency tree: node lines `<id> <label>`, a `#` separator,
/// then edge lines `<from> <to> [label]`. The first node is the project.
pub fn parse_tgf(tgf: &str) -> Resolution {
    let mut lines = tgf.lines().map(str::trim).filter(|line| !line.is_empty());

    let mut nodes: Vec<(&str, &str)> = Vec::new();
    for line in lines.by_ref() {
        if line == "#" {
            break;
        }
        let (id, label) = line
            .split_once(' ')
            .ok_or_else(|| ResolutionError::malformed(format!("TGF node without label: '{}'", line)))?;
        nodes.push((id, label.trim()));
    }

    let (root_id, _) = nodes
        .first()
        .copied()
        .ok_or_else(|| ResolutionError::malformed("empty dependency tree"))?;

    let mut graph = DependencyGraph::new();
    for &(id, label) in &nodes {
        let (artifact, version, scope) = parse_coordinate(label)?;
        graph.add_node(id, artifact, version, scope);
    }

    for line in lines {
        let mut parts = line.split_whitespace();
        let (Some(from), Some(to)) = (parts.next(), parts.next()) else {
            return Err(ResolutionError::malformed(format!("TGF edge without target: '{}'", line)));
        };
        for id in [from, to] {
            if !graph.contains(id) {
                return Err(ResolutionError::malformed(format!("TGF edge to unknown node {}", id)));
            }
        }
        graph.add_edge(from, to);
    }

    graph
        .tree(&[root_id])
        .pop()
        .ok_or_else(|| ResolutionError::malformed("empty dependency tree"))
}

/// Split `group:artifact:type[:classifier]:version[:scope]` into
/// `("group:artifact", version, scope)`.
fn parse_coordinate(label: &str) -> Result<(String, String, Scope), ResolutionError> {
    let coordinate = label.split_whitespace().next().unwrap_or_default();
    let parts: Vec<&str> = coordinate.split(':').collect();

    let (version, scope) = match parts.len() {
        4 => (parts[3], None),
        5 => (parts[3], Some(parts[4])),
        6 => (parts[4], Some(parts[5])),
        _ => {
            return Err(ResolutionError::malformed(format!(
                "'{}' is not a Maven coordinate",
                label
            )))
        }
    };

    let scope = match scope {
        Some("test") => Scope::Test,
        Some("provided") => Scope::Provided,
        _ => Scope::Production,
    };

    Ok((format!("{}:{}", parts[0], parts[1]), version.to_string(), scope))
}
