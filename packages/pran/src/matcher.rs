use glob::{MatchOptions, Pattern};
use std::path::{Component, Path};

use crate::error::ConfigurationError;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Recognizes the definition files of one package manager.
///
/// Each pattern is matched against the trailing path components of a file: a
/// pattern without `/` sees only the file name, `Godeps/Godeps.json` sees the
/// file name and its parent directory. Patterns support the `glob` wildcards
/// plus `{a,b}` alternation.
#[derive(Debug, Clone)]
pub struct ManifestMatcher {
    patterns: Vec<CompiledPattern>,
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone)]
struct Alternative {
    pattern: Pattern,
    components: usize,
}

impl ManifestMatcher {
    /// Compile the prioritized `patterns` of `manager`. The first pattern has the highest priority.
    pub fn new<S: AsRef<str>>(manager: &str, patterns: &[S]) -> Result<Self, ConfigurationError> {
        if patterns.is_empty() {
            return Err(ConfigurationError::NoPatterns {
                manager: manager.to_string(),
            });
        }

        let patterns = patterns
            .iter()
            .map(|pattern| compile(manager, pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    /// Index of the earliest pattern matching `path`, if any.
    pub fn priority(&self, path: &Path) -> Option<usize> {
        self.patterns.iter().position(|compiled| {
            compiled.alternatives.iter().any(|alternative| {
                trailing_components(path, alternative.components)
                    .map(|suffix| alternative.pattern.matches_with(&suffix, MATCH_OPTIONS))
                    .unwrap_or(false)
            })
        })
    }

    pub fn is_match(&self, path: &Path) -> bool {
        self.priority(path).is_some()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|compiled| compiled.source.as_str())
    }
}

fn compile(manager: &str, source: &str) -> Result<CompiledPattern, ConfigurationError> {
    let invalid = |details: String| ConfigurationError::InvalidPattern {
        manager: manager.to_string(),
        pattern: source.to_string(),
        details,
    };

    if source.trim().is_empty() {
        return Err(invalid("pattern is empty".to_string()));
    }
    if source.starts_with('/') || source.split('/').any(|part| part.is_empty() || part == "..") {
        return Err(invalid("pattern must be a relative path without empty or '..' components".to_string()));
    }

    let alternatives = expand_braces(source)
        .map_err(invalid)?
        .into_iter()
        .map(|expanded| {
            let components = expanded.split('/').count();
            Pattern::new(&expanded)
                .map(|pattern| Alternative { pattern, components })
                .map_err(|e| invalid(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CompiledPattern {
        source: source.to_string(),
        alternatives,
    })
}

/// Expand `{a,b}` groups (nesting allowed) into plain glob patterns.
fn expand_braces(pattern: &str) -> Result<Vec<String>, String> {
    let Some(open) = pattern.find('{') else {
        if pattern.contains('}') {
            return Err("unmatched '}'".to_string());
        }
        return Ok(vec![pattern.to_string()]);
    };

    let mut depth = 0;
    let mut close = None;
    let mut splits = Vec::new();
    for (offset, c) in pattern[open..].char_indices() {
        let index = open + offset;
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(index);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(index),
            _ => {}
        }
    }
    let close = close.ok_or_else(|| "unmatched '{'".to_string())?;

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    let mut expanded = Vec::new();
    for window in bounds.windows(2) {
        let choice = &pattern[window[0] + 1..window[1]];
        for tail in expand_braces(&format!("{}{}{}", prefix, choice, suffix))? {
            if !expanded.contains(&tail) {
                expanded.push(tail);
            }
        }
    }
    Ok(expanded)
}

fn trailing_components(path: &Path, count: usize) -> Option<String> {
    let names: Vec<_> = path
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        })
        .collect();

    if names.len() < count {
        return None;
    }
    Some(names[names.len() - count..].join("/"))
}
