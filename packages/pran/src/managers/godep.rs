use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{read_text, resolve_each, ResolverContext};
use crate::error::ResolutionError;
use crate::types::{Dependency, Resolution, Resolver, Scope, UNSPECIFIED_VERSION};

/// Resolves Go projects vendored with godep from `Godeps/Godeps.json`.
pub struct GodepResolver {
    context: ResolverContext,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Godeps {
    import_path: String,
    #[serde(default)]
    deps: Vec<GodepsEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GodepsEntry {
    import_path: String,
    /// `git describe` output when the revision is tagged
    comment: Option<String>,
    rev: String,
}

impl GodepResolver {
    pub fn new(context: &ResolverContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    async fn resolve_file(&self, manifest: PathBuf) -> Resolution {
        let content = read_text(&manifest).await?;
        parse_godeps(&manifest, &content)
    }
}

#[async_trait]
impl Resolver for GodepResolver {
    async fn resolve(&self, definition_files: &[PathBuf]) -> BTreeMap<PathBuf, Resolution> {
        resolve_each(definition_files, self.context.jobs, |file| self.resolve_file(file)).await
    }
}

pub fn parse_godeps(path: &Path, content: &str) -> Resolution {
    let godeps: Godeps = serde_json::from_str(content).map_err(|e| ResolutionError::invalid_file(path, e))?;

    let children = godeps
        .deps
        .into_iter()
        .map(|entry| {
            let version = entry
                .comment
                .filter(|comment| !comment.is_empty())
                .unwrap_or(entry.rev);
            Dependency::new(entry.import_path, version, Scope::Production)
        })
        .collect();

    Ok(Dependency::new(godeps.import_path, UNSPECIFIED_VERSION, Scope::Production).with_children(children))
}
