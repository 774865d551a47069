pub mod ascii_tree;
pub mod bower;
pub mod bundler;
pub mod cocoapods;
pub mod godep;
pub mod gradle;
pub mod maven;
pub mod npm;
pub mod pip;
pub mod sbt;

use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ConfigurationError, ResolutionError};
use crate::matcher::ManifestMatcher;
use crate::tool::ToolRunner;
use crate::types::{Resolution, Resolver};

pub use self::bower::BowerResolver;
pub use self::bundler::BundlerResolver;
pub use self::cocoapods::CocoaPodsResolver;
pub use self::godep::GodepResolver;
pub use self::gradle::GradleResolver;
pub use self::maven::MavenResolver;
pub use self::npm::NpmResolver;
pub use self::pip::PipResolver;
pub use self::sbt::SbtResolver;

/// Shared settings handed to every resolution strategy.
#[derive(Debug, Clone)]
pub struct ResolverContext {
    pub runner: ToolRunner,
    /// Definition files of one manager resolved at the same time.
    pub jobs: usize,
}

impl ResolverContext {
    pub fn new(runner: ToolRunner, jobs: usize) -> Self {
        Self {
            runner,
            jobs: jobs.max(1),
        }
    }
}

impl Default for ResolverContext {
    fn default() -> Self {
        Self::new(ToolRunner::new(Duration::from_secs(300)), 4)
    }
}

/// A package manager: identity, informational metadata, the matcher for its
/// definition files and its resolution strategy.
pub struct PackageManager {
    id: &'static str,
    homepage_url: &'static str,
    primary_language: &'static str,
    matcher: ManifestMatcher,
    resolver: Box<dyn Resolver>,
}

impl PackageManager {
    pub fn new<S: AsRef<str>>(
        id: &'static str,
        homepage_url: &'static str,
        primary_language: &'static str,
        definition_files: &[S],
        resolver: Box<dyn Resolver>,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            id,
            homepage_url,
            primary_language,
            matcher: ManifestMatcher::new(id, definition_files)?,
            resolver,
        })
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn homepage_url(&self) -> &'static str {
        self.homepage_url
    }

    pub fn primary_language(&self) -> &'static str {
        self.primary_language
    }

    pub fn matcher(&self) -> &ManifestMatcher {
        &self.matcher
    }

    pub fn definition_files(&self) -> Vec<&str> {
        self.matcher.patterns().collect()
    }

    pub async fn resolve(&self, definition_files: &[PathBuf]) -> BTreeMap<PathBuf, Resolution> {
        self.resolver.resolve(definition_files).await
    }
}

impl fmt::Debug for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageManager")
            .field("id", &self.id)
            .field("definition_files", &self.definition_files())
            .finish()
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl PartialEq for PackageManager {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PackageManager {}

impl Hash for PackageManager {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

struct Builtin {
    id: &'static str,
    homepage_url: &'static str,
    primary_language: &'static str,
    definition_files: &'static [&'static str],
    resolver: fn(&ResolverContext) -> Box<dyn Resolver>,
}

// Registry order is priority order.
const BUILTIN: &[Builtin] = &[
    Builtin {
        id: "Gradle",
        homepage_url: "https://gradle.org/",
        primary_language: "Java",
        definition_files: &["build.gradle", "build.gradle.kts"],
        resolver: |context| Box::new(GradleResolver::new(context)),
    },
    Builtin {
        id: "Maven",
        homepage_url: "https://maven.apache.org/",
        primary_language: "Java",
        definition_files: &["pom.xml"],
        resolver: |context| Box::new(MavenResolver::new(context)),
    },
    Builtin {
        id: "SBT",
        homepage_url: "http://www.scala-sbt.org/",
        primary_language: "Scala",
        definition_files: &["build.sbt", "build.scala"],
        resolver: |context| Box::new(SbtResolver::new(context)),
    },
    Builtin {
        id: "NPM",
        homepage_url: "https://www.npmjs.com/",
        primary_language: "JavaScript",
        definition_files: &["npm-shrinkwrap.json", "yarn.lock", "package.json"],
        resolver: |context| Box::new(NpmResolver::new(context)),
    },
    Builtin {
        id: "CocoaPods",
        homepage_url: "https://cocoapods.org/",
        primary_language: "Objective-C",
        definition_files: &["Podfile.lock", "Podfile"],
        resolver: |context| Box::new(CocoaPodsResolver::new(context)),
    },
    Builtin {
        id: "Godep",
        homepage_url: "https://godoc.org/github.com/tools/godep",
        primary_language: "Go",
        definition_files: &["Godeps/Godeps.json"],
        resolver: |context| Box::new(GodepResolver::new(context)),
    },
    Builtin {
        id: "Bower",
        homepage_url: "https://bower.io/",
        primary_language: "JavaScript",
        definition_files: &["bower.json"],
        resolver: |context| Box::new(BowerResolver::new(context)),
    },
    Builtin {
        id: "PIP",
        homepage_url: "https://pip.pypa.io/",
        primary_language: "Python",
        definition_files: &["requirements*.txt", "setup.py"],
        resolver: |context| Box::new(PipResolver::new(context)),
    },
    Builtin {
        id: "Bundler",
        homepage_url: "http://bundler.io/",
        primary_language: "Ruby",
        // The lockfile holds the resolved versions, the Gemfile only the declared ones.
        definition_files: &["Gemfile.lock", "Gemfile"],
        resolver: |context| Box::new(BundlerResolver::new(context)),
    },
];

/// Outcome of picking managers by name.
#[derive(Debug, Default)]
pub struct Selection {
    /// Selected managers in registry order.
    pub managers: Vec<Arc<PackageManager>>,
    /// Names that matched no known manager.
    pub unknown: Vec<String>,
}

/// The ordered set of known package managers. Built once, then only read.
#[derive(Debug, Default)]
pub struct Registry {
    managers: Vec<Arc<PackageManager>>,
}

impl Registry {
    /// All built-in package managers with their default definition file patterns.
    pub fn new(context: &ResolverContext) -> Result<Self, ConfigurationError> {
        let managers = BUILTIN
            .iter()
            .map(|builtin| build(builtin, builtin.definition_files, context).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { managers })
    }

    /// Built-in package managers, with definition file patterns replaced per
    /// manager identity (case-insensitive). A manager whose patterns do not
    /// compile is left out and reported, the others are still registered.
    pub fn with_patterns(
        context: &ResolverContext,
        overrides: &HashMap<String, Vec<String>>,
    ) -> (Self, Vec<ConfigurationError>) {
        let mut errors = Vec::new();

        for name in overrides.keys() {
            if !BUILTIN.iter().any(|builtin| builtin.id.eq_ignore_ascii_case(name)) {
                errors.push(ConfigurationError::UnknownManager { name: name.clone() });
            }
        }

        let mut managers = Vec::new();
        for builtin in BUILTIN {
            let patterns = overrides
                .iter()
                .find(|(name, _)| builtin.id.eq_ignore_ascii_case(name))
                .map(|(_, patterns)| patterns.iter().map(String::as_str).collect::<Vec<_>>())
                .unwrap_or_else(|| builtin.definition_files.to_vec());

            match build(builtin, &patterns, context) {
                Ok(manager) => managers.push(Arc::new(manager)),
                Err(e) => errors.push(e),
            }
        }

        (Self { managers }, errors)
    }

    pub fn managers(&self) -> &[Arc<PackageManager>] {
        &self.managers
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.managers.iter().map(|manager| manager.id()).collect()
    }

    /// Case-insensitive lookup by identity.
    pub fn get(&self, name: &str) -> Option<&Arc<PackageManager>> {
        self.managers
            .iter()
            .find(|manager| manager.id().eq_ignore_ascii_case(name.trim()))
    }

    /// Pick managers by name. Unknown names are collected, not treated as errors.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Selection {
        let mut selection = Selection::default();

        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            if self.get(name).is_none() && !selection.unknown.iter().any(|u| u == name) {
                selection.unknown.push(name.to_string());
            }
        }

        selection.managers = self
            .managers
            .iter()
            .filter(|manager| {
                names
                    .iter()
                    .any(|name| manager.id().eq_ignore_ascii_case(name.as_ref().trim()))
            })
            .cloned()
            .collect();

        selection
    }
}

fn build(
    builtin: &Builtin,
    patterns: &[&str],
    context: &ResolverContext,
) -> Result<PackageManager, ConfigurationError> {
    PackageManager::new(
        builtin.id,
        builtin.homepage_url,
        builtin.primary_language,
        patterns,
        (builtin.resolver)(context),
    )
}

/// Resolve every file with `resolve_one`, running at most `jobs` at a time.
pub(crate) async fn resolve_each<F, Fut>(
    definition_files: &[PathBuf],
    jobs: usize,
    resolve_one: F,
) -> BTreeMap<PathBuf, Resolution>
where
    F: Fn(PathBuf) -> Fut,
    Fut: Future<Output = Resolution>,
{
    stream::iter(definition_files.iter().cloned())
        .map(|file| {
            let resolution = resolve_one(file.clone());
            async move { (file, resolution.await) }
        })
        .buffer_unordered(jobs.max(1))
        .collect()
        .await
}

/// Directory a definition file belongs to.
pub(crate) fn project_dir(definition_file: &Path) -> &Path {
    match definition_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Name used for tree roots whose definition file does not name the project.
pub(crate) fn project_name(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .or_else(|| {
            std::fs::canonicalize(dir)
                .ok()
                .and_then(|path| path.file_name().map(|name| name.to_string_lossy().to_string()))
        })
        .unwrap_or_else(|| dir.display().to_string())
}

pub(crate) async fn read_text(path: &Path) -> Result<String, ResolutionError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ResolutionError::invalid_file(path, e))
}

pub(crate) async fn read_json(path: &Path) -> Result<serde_json::Value, ResolutionError> {
    let content = read_text(path).await?;
    serde_json::from_str(&content).map_err(|e| ResolutionError::invalid_file(path, e))
}

/// Split `name (detail)` as written in Gemfile.lock and Podfile.lock entries.
pub(crate) fn split_parenthesized(entry: &str) -> (&str, Option<&str>) {
    let entry = entry.trim();
    match entry.split_once(" (") {
        Some((name, rest)) => (name.trim(), rest.strip_suffix(')').or(Some(rest)).map(str::trim)),
        None => (entry, None),
    }
}
