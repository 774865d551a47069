use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Graph;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::types::{Dependency, Scope};

/// Deepest path expanded from a root; longer chains end in a cycle-break leaf.
const MAX_DEPTH: usize = 100;

/// A package of a lockfile or tool report, keyed by whatever names it there.
#[derive(Debug, Clone)]
struct Node {
    key: String,
    package: Option<Package>,
}

#[derive(Debug, Clone)]
struct Package {
    artifact: String,
    version: String,
    scope: Scope,
}

/// Resolved packages and the edges between them. Such graphs may loop and
/// share dependencies; [`DependencyGraph::tree`] turns them into a finite tree.
///
/// Edges may name a package before it is registered. Names that never get
/// registered are left out of the tree.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: Graph<Node, ()>,
    keys: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(&mut self, key: &str) -> NodeIndex {
        if let Some(&index) = self.keys.get(key) {
            return index;
        }
        let index = self.graph.add_node(Node {
            key: key.to_string(),
            package: None,
        });
        self.keys.insert(key.to_string(), index);
        index
    }

    /// Register the package known as `key`. The first registration of a key
    /// wins; returns whether this one did.
    pub fn add_node(
        &mut self,
        key: &str,
        artifact: impl Into<String>,
        version: impl Into<String>,
        scope: Scope,
    ) -> bool {
        let index = self.index(key);
        let node = &mut self.graph[index];
        if node.package.is_some() {
            return false;
        }
        node.package = Some(Package {
            artifact: artifact.into(),
            version: version.into(),
            scope,
        });
        true
    }

    /// Record that `from` depends on `to`. Edges keep their insertion order in the tree.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        let from = self.index(from);
        let to = self.index(to);
        self.graph.add_edge(from, to, ());
    }

    /// Register a production package named `name` together with its
    /// dependencies. Later registrations of the same name are ignored.
    pub fn add_package(&mut self, name: impl Into<String>, version: impl Into<String>, dependencies: Vec<String>) {
        let name = name.into();
        if !self.add_node(&name, name.as_str(), version, Scope::Production) {
            return;
        }
        for dependency in &dependencies {
            self.add_edge(&name, dependency);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys
            .get(key)
            .is_some_and(|&index| self.graph[index].package.is_some())
    }

    /// Number of registered packages.
    pub fn len(&self) -> usize {
        self.graph
            .node_weights()
            .filter(|node| node.package.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expand `roots` into dependency trees.
    ///
    /// Each package is expanded once across all roots, depth first; later
    /// occurrences are [`Dependency::repeated`] leaves, and a package already
    /// on the current path becomes a cycle-break leaf.
    pub fn tree<S: AsRef<str>>(&self, roots: &[S]) -> Vec<Dependency> {
        let mut expansion = Expansion {
            graph: &self.graph,
            path: Vec::new(),
            expanded: HashSet::new(),
        };
        roots
            .iter()
            .filter_map(|root| match self.keys.get(root.as_ref()) {
                Some(&index) => expansion.expand(index),
                None => {
                    debug!("No resolved entry for {}, skipping", root.as_ref());
                    None
                }
            })
            .collect()
    }
}

struct Expansion<'a> {
    graph: &'a Graph<Node, ()>,
    path: Vec<NodeIndex>,
    expanded: HashSet<NodeIndex>,
}

impl Expansion<'_> {
    fn expand(&mut self, index: NodeIndex) -> Option<Dependency> {
        let graph = self.graph;
        let node = &graph[index];
        let Some(package) = node.package.as_ref() else {
            debug!("No resolved entry for {}, skipping", node.key);
            return None;
        };
        let (artifact, version, scope) = (package.artifact.as_str(), package.version.as_str(), package.scope);

        if self.path.contains(&index) {
            debug!("Dependency cycle at {}", node.key);
            return Some(Dependency::cycle_break(artifact, version, scope));
        }
        if self.path.len() >= MAX_DEPTH {
            debug!("Dependency chain deeper than {} at {}", MAX_DEPTH, node.key);
            return Some(Dependency::cycle_break(artifact, version, scope));
        }
        if !self.expanded.insert(index) {
            return Some(Dependency::repeated(artifact, version, scope));
        }

        let mut edges: Vec<(EdgeIndex, NodeIndex)> = graph
            .edges(index)
            .map(|edge| (edge.id(), edge.target()))
            .collect();
        edges.sort_by_key(|(edge, _)| *edge);

        self.path.push(index);
        let children = edges
            .into_iter()
            .filter_map(|(_, target)| self.expand(target))
            .collect();
        self.path.pop();

        Some(Dependency::new(artifact, version, scope).with_children(children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tree_follows_edges() {
        let mut graph = DependencyGraph::new();
        graph.add_package("rails", "5.0.0", names(&["actionpack", "rack"]));
        graph.add_package("actionpack", "5.0.0", names(&["rack"]));
        graph.add_package("rack", "2.0.1", vec![]);

        let tree = graph.tree(&["rails"]);
        assert_eq!(tree.len(), 1);
        let rails = &tree[0];
        assert_eq!(rails.version(), "5.0.0");
        assert_eq!(rails.children().len(), 2);
        assert_eq!(rails.children()[0].artifact(), "actionpack");
        assert_eq!(rails.children()[0].children()[0].artifact(), "rack");
        assert!(!rails.children()[0].children()[0].is_repeated());
        assert!(rails.children()[1].is_repeated());
    }

    #[test]
    fn test_cycles_are_broken_and_reported() {
        let mut graph = DependencyGraph::new();
        graph.add_package("a", "1.0", names(&["b"]));
        graph.add_package("b", "2.0", names(&["a"]));

        let tree = graph.tree(&["a"]);
        let b = &tree[0].children()[0];
        assert_eq!(b.artifact(), "b");
        let back_edge = &b.children()[0];
        assert_eq!(back_edge.artifact(), "a");
        assert!(back_edge.is_cycle());
        assert!(back_edge.children().is_empty());
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_package("loop", "0.1", names(&["loop"]));

        let tree = graph.tree(&["loop"]);
        assert!(!tree[0].is_cycle());
        assert!(tree[0].children()[0].is_cycle());
    }

    #[test]
    fn test_unknown_names_are_skipped() {
        let mut graph = DependencyGraph::new();
        graph.add_package("a", "1.0", names(&["platform-only"]));

        let tree = graph.tree(&["a", "missing"]);
        assert_eq!(tree.len(), 1);
        assert!(tree[0].children().is_empty());
        assert!(!graph.contains("platform-only"));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_edges_may_precede_registration() {
        let mut graph = DependencyGraph::new();
        graph.add_package("app", "1.0", names(&["zlib", "curl"]));
        graph.add_package("curl", "7.0", names(&["zlib"]));
        graph.add_package("zlib", "1.2", vec![]);

        let tree = graph.tree(&["app"]);
        let children: Vec<_> = tree[0].children().iter().map(|c| c.to_string()).collect();
        assert_eq!(children, vec!["zlib@1.2", "curl@7.0"]);
    }

    #[test]
    fn test_first_registration_wins() {
        let mut graph = DependencyGraph::new();
        graph.add_package("a", "1.0", vec![]);
        graph.add_package("a", "2.0", names(&["b"]));
        graph.add_package("b", "1.0", vec![]);

        assert_eq!(graph.len(), 2);
        let tree = graph.tree(&["a"]);
        assert_eq!(tree[0].version(), "1.0");
        assert!(tree[0].children().is_empty());
    }

    #[test]
    fn test_nodes_keep_their_own_scope() {
        let mut graph = DependencyGraph::new();
        graph.add_node("1", "g:app", "1.0", Scope::Production);
        graph.add_node("2", "junit:junit", "4.12", Scope::Test);
        graph.add_edge("1", "2");

        let tree = graph.tree(&["1"]);
        assert_eq!(tree[0].children()[0].scope(), Scope::Test);
    }

    #[test]
    fn test_shared_dependencies_are_expanded_once() {
        // Every package depends on both packages of the next layer.
        let mut graph = DependencyGraph::new();
        for layer in 0..22 {
            let next = if layer < 21 {
                vec![format!("a{}", layer + 1), format!("b{}", layer + 1)]
            } else {
                Vec::new()
            };
            graph.add_package(format!("a{}", layer), "1", next.clone());
            graph.add_package(format!("b{}", layer), "1", next);
        }

        let tree = graph.tree(&["a0"]);
        let root = &tree[0];
        assert_eq!(root.packages().len(), 42);
        assert_eq!(root.node_count(), 83);
        let b1 = &root.children()[1];
        assert_eq!(b1.artifact(), "b1");
        assert!(b1.children().iter().all(Dependency::is_repeated));
    }

    #[test]
    fn test_deep_chains_are_capped() {
        let mut graph = DependencyGraph::new();
        for i in 0..150 {
            graph.add_package(format!("p{}", i), "1", vec![format!("p{}", i + 1)]);
        }

        let tree = graph.tree(&["p0"]);
        assert_eq!(tree[0].depth(), MAX_DEPTH + 1);
    }
}
