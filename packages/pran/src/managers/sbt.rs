use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use super::ascii_tree::{self, TreeLine};
use super::{project_dir, resolve_each, ResolverContext};
use crate::error::ResolutionError;
use crate::tool::SBT;
use crate::types::{Dependency, Resolution, Resolver, Scope};

const MARKER: &str = "+-";

/// Resolves sbt builds from the `dependencyTree` task output.
pub struct SbtResolver {
    context: ResolverContext,
}

impl SbtResolver {
    pub fn new(context: &ResolverContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    async fn resolve_file(&self, build_file: PathBuf) -> Resolution {
        let dir = project_dir(&build_file);
        let output = self
            .context
            .runner
            .run(&SBT, dir, &["-batch", "-no-colors", "dependencyTree"])
            .await?;
        parse_dependency_tree(&output)
    }
}

#[async_trait]
impl Resolver for SbtResolver {
    async fn resolve(&self, definition_files: &[PathBuf]) -> BTreeMap<PathBuf, Resolution> {
        resolve_each(definition_files, self.context.jobs, |file| self.resolve_file(file)).await
    }
}

fn module_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([\w.\-]+):([\w.\-]+):([\w.\-+]+)(?: \[S\])?$").expect("module pattern is valid")
    })
}

/// Parse the first project tree printed by `sbt dependencyTree`. Log
/// prefixes are ignored and evicted versions are left out.
pub fn parse_dependency_tree(output: &str) -> Resolution {
    let mut root: Option<(String, String)> = None;
    let mut lines = Vec::new();

    for line in output.lines() {
        let line = strip_log_level(line.trim_end());

        if let Some(module) = parse_module(line) {
            if root.is_some() {
                break;
            }
            root = Some(module);
            continue;
        }

        if root.is_none() {
            continue;
        }
        let Some(position) = line.find(MARKER) else {
            continue;
        };
        if !line[..position].chars().all(|c| c == '|' || c == ' ') {
            continue;
        }

        let label = &line[position + MARKER.len()..];
        lines.push(TreeLine {
            depth: position.saturating_sub(2) / 2,
            label: if label.contains("(evicted by") {
                None
            } else {
                parse_module(label)
            },
        });
    }

    let (artifact, version) = root.ok_or_else(|| ResolutionError::malformed("sbt printed no dependency tree"))?;
    Ok(Dependency::new(artifact, version, Scope::Production).with_children(ascii_tree::build(&lines, Scope::Production)))
}

fn strip_log_level(line: &str) -> &str {
    for level in ["[info] ", "[warn] ", "[success] "] {
        if let Some(rest) = line.strip_prefix(level) {
            return rest;
        }
    }
    line
}

fn parse_module(text: &str) -> Option<(String, String)> {
    let captures = module_pattern().captures(text.trim())?;
    Some((format!("{}:{}", &captures[1], &captures[2]), captures[3].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const OUTPUT: &str = "\
[info] welcome to sbt 1.5.5 (Eclipse Adoptium Java 11.0.12)
[info] loading project definition from /work/ledger/project
[info] set current project to ledger (in build file:/work/ledger/)
[info] com.acme:ledger_2.13:0.3.0-SNAPSHOT [S]
[info]   +-com.typesafe.akka:akka-actor_2.13:2.6.14 [S]
[info]   | +-com.typesafe:config:1.4.0
[info]   | +-org.scala-lang.modules:scala-java8-compat_2.13:0.9.0 [S]
[info]   |
[info]   +-org.slf4j:slf4j-api:1.7.30
[info]   +-org.slf4j:slf4j-api:1.7.25 (evicted by: 1.7.30)
[info]   +-org.typelevel:cats-core_2.13:2.6.1 [S]
[info]     +-org.typelevel:cats-kernel_2.13:2.6.1 [S]
[info]     +-org.typelevel:simulacrum-scalafix-annotations_2.13:0.5.4 [S]
[info]
[info] com.acme:ledger-api_2.13:0.3.0-SNAPSHOT [S]
[info]   +-io.circe:circe-core_2.13:0.14.1 [S]
[success] Total time: 2 s, completed Jun 1, 2021 10:15:42 AM
";

    #[test]
    fn test_parse_dependency_tree() {
        let root = parse_dependency_tree(OUTPUT).unwrap();

        assert_eq!(root.to_string(), "com.acme:ledger_2.13@0.3.0-SNAPSHOT");
        let children: Vec<_> = root.children().iter().map(|c| c.to_string()).collect();
        assert_eq!(
            children,
            vec![
                "com.typesafe.akka:akka-actor_2.13@2.6.14",
                "org.slf4j:slf4j-api@1.7.30",
                "org.typelevel:cats-core_2.13@2.6.1",
            ]
        );
        assert_eq!(root.find("com.typesafe:config").unwrap().version(), "1.4.0");
        assert_eq!(root.find("org.typelevel:cats-core_2.13").unwrap().children().len(), 2);
        assert!(root.find("io.circe:circe-core_2.13").is_none());
    }

    #[test]
    fn test_output_without_tree_is_malformed() {
        let result = parse_dependency_tree("[error] Not a valid command: dependencyTree\n");
        assert!(matches!(result, Err(ResolutionError::MalformedOutput { .. })));
    }
}
