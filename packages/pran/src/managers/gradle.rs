use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use super::ascii_tree::{self, TreeLine};
use super::{project_dir, project_name, resolve_each, ResolverContext};
use crate::tool::GRADLE;
use crate::types::{Dependency, Resolution, Resolver, Scope, UNSPECIFIED_VERSION};

/// Configurations read for each scope, newest Gradle naming first.
const PRODUCTION_CONFIGURATIONS: &[&str] = &["runtimeClasspath", "runtime"];
const TEST_CONFIGURATIONS: &[&str] = &["testRuntimeClasspath", "testRuntime"];

const MARKERS: &[&str] = &["+--- ", "\\--- "];
const INDENT: usize = 5;

/// Resolves Gradle builds from the `dependencies` task report, preferring
/// the project's Gradle wrapper.
pub struct GradleResolver {
    context: ResolverContext,
}

impl GradleResolver {
    pub fn new(context: &ResolverContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    async fn resolve_file(&self, build_file: PathBuf) -> Resolution {
        let dir = project_dir(&build_file);
        let report = self.context.runner.run(&GRADLE, dir, &["dependencies", "-q"]).await?;
        Ok(parse_dependencies_report(&report, dir))
    }
}

#[async_trait]
impl Resolver for GradleResolver {
    async fn resolve(&self, definition_files: &[PathBuf]) -> BTreeMap<PathBuf, Resolution> {
        resolve_each(definition_files, self.context.jobs, |file| self.resolve_file(file)).await
    }
}

/// Build a tree from the report of `gradle dependencies`. Runtime
/// dependencies are production scoped; test runtime dependencies not already
/// on the runtime classpath are test scoped.
pub fn parse_dependencies_report(report: &str, dir: &Path) -> Dependency {
    let mut project = None;
    let mut configurations: HashMap<String, Vec<TreeLine>> = HashMap::new();
    let mut current: Option<String> = None;

    for line in report.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            current = None;
            continue;
        }

        if let Some(tree_line) = parse_tree_line(line) {
            if let Some(configuration) = &current {
                configurations.entry(configuration.clone()).or_default().push(tree_line);
            }
            continue;
        }

        if project.is_none() {
            if let Some(name) = project_header(line) {
                project = Some(name);
                continue;
            }
        }

        let name = line.split(" - ").next().unwrap_or(line).trim();
        current = is_configuration_name(name).then(|| name.to_string());
    }

    let section = |candidates: &[&str], scope: Scope| {
        candidates
            .iter()
            .find_map(|name| configurations.get(*name))
            .map(|lines| ascii_tree::build(lines, scope))
            .unwrap_or_default()
    };

    let mut children = section(PRODUCTION_CONFIGURATIONS, Scope::Production);
    children.extend(section(TEST_CONFIGURATIONS, Scope::Test));

    Dependency::new(project.unwrap_or_else(|| project_name(dir)), UNSPECIFIED_VERSION, Scope::Production)
        .with_children(children)
}

fn parse_tree_line(line: &str) -> Option<TreeLine> {
    let position = MARKERS.iter().filter_map(|marker| line.find(marker)).min()?;
    if !line[..position].chars().all(|c| c == '|' || c == ' ') {
        return None;
    }

    Some(TreeLine {
        depth: position / INDENT,
        label: parse_label(&line[position + INDENT..]),
    })
}

fn project_header(line: &str) -> Option<String> {
    let rest = line
        .strip_prefix("Root project ")
        .or_else(|| line.strip_prefix("Project "))?;
    let name = rest.split('\'').nth(1)?;
    Some(name.to_string())
}

fn is_configuration_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Read a report entry such as `com.google.guava:guava:23.0 -> 24.0 (*)`.
/// Constraints `(c)`, unresolvable entries `(n)` and failures are left out.
fn parse_label(label: &str) -> Option<(String, String)> {
    let label = label.trim();
    let label = label.strip_suffix(" (*)").unwrap_or(label);
    if label.ends_with(" (c)") || label.ends_with(" (n)") || label.ends_with(" FAILED") {
        return None;
    }

    if label.starts_with("project ") {
        return Some((label.to_string(), UNSPECIFIED_VERSION.to_string()));
    }

    let (declared, resolved) = match label.split_once(" -> ") {
        Some((declared, resolved)) => (declared.trim(), Some(resolved.trim())),
        None => (label, None),
    };

    let mut parts = declared.splitn(3, ':');
    let group = parts.next()?;
    let name = parts.next()?;
    let version = resolved
        .or_else(|| parts.next())
        .filter(|version| !version.is_empty())
        .unwrap_or(UNSPECIFIED_VERSION);

    Some((format!("{}:{}", group, name), version.to_string()))
}
