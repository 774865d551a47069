//! Builds dependency trees from the indented ascii reports printed by Gradle and sbt.

use crate::types::{Dependency, Scope};

/// One line of a tree report: its nesting depth (0 for direct dependencies)
/// and the parsed `(artifact, version)`, or `None` for lines to leave out
/// together with their subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeLine {
    pub depth: usize,
    pub label: Option<(String, String)>,
}

/// Assemble tree lines in report order into nested nodes.
///
/// Lines nested deeper than their predecessor allows have no parent and are dropped.
pub fn build(lines: &[TreeLine], scope: Scope) -> Vec<Dependency> {
    let mut index = 0;
    build_level(lines, &mut index, 0, scope)
}

fn build_level(lines: &[TreeLine], index: &mut usize, depth: usize, scope: Scope) -> Vec<Dependency> {
    let mut nodes = Vec::new();

    while let Some(line) = lines.get(*index) {
        if line.depth < depth {
            break;
        }
        *index += 1;
        if line.depth > depth {
            continue;
        }

        let children = build_level(lines, index, depth + 1, scope);
        if let Some((artifact, version)) = &line.label {
            nodes.push(Dependency::new(artifact.as_str(), version.as_str(), scope).with_children(children));
        }
    }

    nodes
}
