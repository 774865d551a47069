use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;

use crate::error::ResolutionError;

/// Version used for tree roots whose definition file carries no project version.
pub const UNSPECIFIED_VERSION: &str = "unspecified";

/// Usage context of a dependency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Production,
    Development,
    Test,
    Provided,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Production => write!(f, "production"),
            Scope::Development => write!(f, "development"),
            Scope::Test => write!(f, "test"),
            Scope::Provided => write!(f, "provided"),
        }
    }
}

/// One resolved dependency and its transitive dependencies.
///
/// Siblings never share an `(artifact, version)` pair, and the tree never
/// contains a cycle: where the native graph loops back, the repeated package
/// appears once more as a leaf with [`Dependency::is_cycle`] set. Trees built
/// from a lockfile graph expand a shared package only once; its other
/// occurrences are leaves with [`Dependency::is_repeated`] set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    artifact: String,
    version: String,
    /// Only authoritative for strategies whose input distinguishes scopes
    /// (npm ls, bower, Maven, Gradle). Flat lockfiles and yarn trees report
    /// everything as production.
    scope: Scope,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<Dependency>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    cycle: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    repeated: bool,
}

impl Dependency {
    pub fn new(artifact: impl Into<String>, version: impl Into<String>, scope: Scope) -> Self {
        Self {
            artifact: artifact.into(),
            version: version.into(),
            scope,
            children: Vec::new(),
            cycle: false,
            repeated: false,
        }
    }

    /// A leaf standing in for a package that already occurs on the path from the root.
    pub fn cycle_break(artifact: impl Into<String>, version: impl Into<String>, scope: Scope) -> Self {
        Self {
            cycle: true,
            ..Self::new(artifact, version, scope)
        }
    }

    /// A leaf for a package whose dependencies are listed where it first occurs.
    pub fn repeated(artifact: impl Into<String>, version: impl Into<String>, scope: Scope) -> Self {
        Self {
            repeated: true,
            ..Self::new(artifact, version, scope)
        }
    }

    /// Attach children, dropping any later duplicate of an `(artifact, version)` pair.
    pub fn with_children(mut self, children: Vec<Dependency>) -> Self {
        let mut seen = HashSet::new();
        self.children = children
            .into_iter()
            .filter(|child| seen.insert((child.artifact.clone(), child.version.clone())))
            .collect();
        self
    }

    /// Set the scope of this node and its whole subtree.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self.children = self
            .children
            .into_iter()
            .map(|child| child.with_scope(scope))
            .collect();
        self
    }

    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn children(&self) -> &[Dependency] {
        &self.children
    }

    pub fn is_cycle(&self) -> bool {
        self.cycle
    }

    pub fn is_repeated(&self) -> bool {
        self.repeated
    }

    /// Number of nodes in the tree, root included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Dependency::node_count).sum::<usize>()
    }

    /// Length of the longest root-to-leaf path, counting nodes.
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Dependency::depth).max().unwrap_or(0)
    }

    /// Sorted, de-duplicated `(artifact, version)` pairs of every node below the root.
    pub fn packages(&self) -> BTreeSet<(&str, &str)> {
        let mut packages = BTreeSet::new();
        let mut stack: Vec<&Dependency> = self.children.iter().collect();
        while let Some(node) = stack.pop() {
            packages.insert((node.artifact.as_str(), node.version.as_str()));
            stack.extend(node.children.iter());
        }
        packages
    }

    /// First node below the root, in depth-first order, with the given artifact.
    pub fn find(&self, artifact: &str) -> Option<&Dependency> {
        self.children.iter().find_map(|child| {
            if child.artifact == artifact {
                Some(child)
            } else {
                child.find(artifact)
            }
        })
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.artifact, self.version)
    }
}

pub type Resolution = Result<Dependency, ResolutionError>;

/// Resolution strategy of a package manager.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve every given definition file. The returned map has one entry per
    /// input path; a failure for one file never affects the others.
    async fn resolve(&self, definition_files: &[PathBuf]) -> BTreeMap<PathBuf, Resolution>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_tree() -> Dependency {
        Dependency::new("app", "1.0.0", Scope::Production).with_children(vec![
            Dependency::new("express", "4.18.2", Scope::Production).with_children(vec![
                Dependency::new("debug", "2.6.9", Scope::Production)
                    .with_children(vec![Dependency::new("ms", "2.0.0", Scope::Production)]),
            ]),
            Dependency::new("debug", "2.6.9", Scope::Production),
        ])
    }

    #[test]
    fn test_with_children_drops_duplicate_pairs() {
        let root = Dependency::new("app", "1.0.0", Scope::Production).with_children(vec![
            Dependency::new("left-pad", "1.3.0", Scope::Production),
            Dependency::new("left-pad", "1.3.0", Scope::Development),
            Dependency::new("left-pad", "1.2.0", Scope::Production),
        ]);

        assert_eq!(root.children().len(), 2);
        assert_eq!(root.children()[0].scope(), Scope::Production);
        assert_eq!(root.children()[1].version(), "1.2.0");
    }

    #[test]
    fn test_with_scope_applies_to_subtree() {
        let tree = sample_tree().with_scope(Scope::Development);
        let ms = tree.find("ms").unwrap();
        assert_eq!(ms.scope(), Scope::Development);
        assert_eq!(tree.scope(), Scope::Development);
    }

    #[test]
    fn test_counts_and_depth() {
        let tree = sample_tree();
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.depth(), 4);
        assert_eq!(Dependency::new("leaf", "1", Scope::Production).depth(), 1);
    }

    #[test]
    fn test_packages_are_sorted_and_unique() {
        let tree = sample_tree();
        let packages: Vec<_> = tree.packages().into_iter().collect();
        assert_eq!(
            packages,
            vec![("debug", "2.6.9"), ("express", "4.18.2"), ("ms", "2.0.0")]
        );
    }

    #[test]
    fn test_cycle_break_serialization() {
        let node = Dependency::cycle_break("a", "1.0.0", Scope::Production);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["cycle"], serde_json::Value::Bool(true));
        assert!(json.get("children").is_none());

        let plain = serde_json::to_value(Dependency::new("b", "2", Scope::Test)).unwrap();
        assert!(plain.get("cycle").is_none());
        assert!(plain.get("repeated").is_none());

        let repeated = serde_json::to_value(Dependency::repeated("c", "3", Scope::Production)).unwrap();
        assert_eq!(repeated["repeated"], serde_json::Value::Bool(true));
        assert!(repeated.get("cycle").is_none());
        assert_eq!(plain["scope"], "test");
    }

    #[test]
    fn test_display() {
        let dep = Dependency::new("lodash", "4.17.0", Scope::Production);
        assert_eq!(dep.to_string(), "lodash@4.17.0");
        assert_eq!(Scope::Provided.to_string(), "provided");
    }
}
