use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{project_dir, project_name, read_text, resolve_each, split_parenthesized, ResolverContext};
use crate::error::ResolutionError;
use crate::graph::DependencyGraph;
use crate::types::{Dependency, Resolution, Resolver, Scope, UNSPECIFIED_VERSION};

const LOCKFILE: &str = "Gemfile.lock";

/// Resolves Ruby projects from `Gemfile.lock`. A `Gemfile` is only accepted
/// next to its lockfile, since it lacks resolved versions.
pub struct BundlerResolver {
    context: ResolverContext,
}

impl BundlerResolver {
    pub fn new(context: &ResolverContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    async fn resolve_file(&self, definition_file: PathBuf) -> Resolution {
        let dir = project_dir(&definition_file);
        let lockfile = if definition_file.file_name().is_some_and(|name| name == "Gemfile") {
            let lockfile = dir.join(LOCKFILE);
            if !lockfile.is_file() {
                return Err(ResolutionError::unsupported(
                    &definition_file,
                    "a Gemfile without Gemfile.lock has no resolved versions; run `bundle lock` first",
                ));
            }
            lockfile
        } else {
            definition_file.clone()
        };

        let content = read_text(&lockfile).await?;
        let (graph, roots) = parse_gemfile_lock(&content);
        if graph.is_empty() && roots.is_empty() && !content.contains("DEPENDENCIES") {
            return Err(ResolutionError::invalid_file(&lockfile, "no GEM or DEPENDENCIES section"));
        }

        Ok(Dependency::new(project_name(dir), UNSPECIFIED_VERSION, Scope::Production)
            .with_children(graph.tree(&roots)))
    }
}

#[async_trait]
impl Resolver for BundlerResolver {
    async fn resolve(&self, definition_files: &[PathBuf]) -> BTreeMap<PathBuf, Resolution> {
        resolve_each(definition_files, self.context.jobs, |file| self.resolve_file(file)).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    Specs,
    Dependencies,
    Other,
}

/// Read the locked gems and the Gemfile's direct dependencies.
pub fn parse_gemfile_lock(content: &str) -> (DependencyGraph, Vec<String>) {
    let mut graph = DependencyGraph::new();
    let mut roots = Vec::new();
    let mut section = Section::Other;
    let mut current: Option<(String, String, Vec<String>)> = None;

    for line in content.lines() {
        let indent = line.len() - line.trim_start().len();
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        if indent == 0 {
            flush(&mut graph, current.take());
            section = match text {
                "DEPENDENCIES" => Section::Dependencies,
                _ => Section::Other,
            };
            continue;
        }

        match section {
            Section::Dependencies if indent == 2 => {
                let (name, _) = split_parenthesized(text);
                roots.push(name.trim_end_matches('!').to_string());
            }
            Section::Other if indent == 2 && text == "specs:" => section = Section::Specs,
            Section::Specs if indent == 4 => {
                flush(&mut graph, current.take());
                let (name, version) = split_parenthesized(text);
                current = Some((
                    name.to_string(),
                    version.unwrap_or(UNSPECIFIED_VERSION).to_string(),
                    Vec::new(),
                ));
            }
            Section::Specs if indent == 6 => {
                if let Some((_, _, dependencies)) = current.as_mut() {
                    dependencies.push(split_parenthesized(text).0.to_string());
                }
            }
            _ => {}
        }
    }
    flush(&mut graph, current);

    (graph, roots)
}

fn flush(graph: &mut DependencyGraph, spec: Option<(String, String, Vec<String>)>) {
    if let Some((name, version, dependencies)) = spec {
        graph.add_package(name, version, dependencies);
    }
}
