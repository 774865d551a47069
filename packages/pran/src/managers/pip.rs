use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::debug;

use super::{project_dir, project_name, read_text, resolve_each, ResolverContext};
use crate::error::ResolutionError;
use crate::types::{Dependency, Resolution, Resolver, Scope, UNSPECIFIED_VERSION};

/// Resolves Python requirements files. Only the listed requirements are
/// reported; transitive dependencies would need an installed environment.
pub struct PipResolver {
    context: ResolverContext,
}

impl PipResolver {
    pub fn new(context: &ResolverContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    async fn resolve_file(&self, definition_file: PathBuf) -> Resolution {
        if definition_file.file_name().is_some_and(|name| name == "setup.py") {
            return Err(ResolutionError::unsupported(
                &definition_file,
                "setup.py must be executed to learn its requirements; pin them in a requirements file instead",
            ));
        }

        let content = read_text(&definition_file).await?;
        let dir = project_dir(&definition_file);
        Ok(Dependency::new(project_name(dir), UNSPECIFIED_VERSION, Scope::Production)
            .with_children(parse_requirements(&content)))
    }
}

#[async_trait]
impl Resolver for PipResolver {
    async fn resolve(&self, definition_files: &[PathBuf]) -> BTreeMap<PathBuf, Resolution> {
        resolve_each(definition_files, self.context.jobs, |file| self.resolve_file(file)).await
    }
}

fn requirement_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[[^\]]*\])?\s*(.*)$").expect("requirement pattern is valid")
    })
}

/// Parse the requirements of a pip requirements file.
///
/// Exact pins (`==`, `===`) give their version; any other specifier is kept
/// as written. Options, comments, environment markers and requirements
/// without a project name (paths, bare URLs) are left out.
pub fn parse_requirements(content: &str) -> Vec<Dependency> {
    let joined = content.replace("\\\r\n", "").replace("\\\n", "");

    joined
        .lines()
        .filter_map(|line| {
            let line = strip_comment(line);
            // Per-requirement options such as --hash follow the specifier.
            let line = line.find(" --").map_or(line, |index| &line[..index]).trim();
            if line.is_empty() || line.starts_with('-') {
                return None;
            }

            let Some(captures) = requirement_pattern().captures(line) else {
                debug!("Skipping requirement without a project name: {}", line);
                return None;
            };
            let name = captures.get(1)?.as_str();
            let specifier = captures
                .get(2)
                .map(|rest| rest.as_str().split(';').next().unwrap_or_default().trim())
                .unwrap_or_default();

            Some(Dependency::new(name, requirement_version(specifier), Scope::Production))
        })
        .collect()
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find(" #").or_else(|| line.find("\t#")) {
        Some(index) => &line[..index],
        None => line,
    }
}

fn requirement_version(specifier: &str) -> String {
    if specifier.is_empty() {
        return UNSPECIFIED_VERSION.to_string();
    }
    if let Some(url) = specifier.strip_prefix('@') {
        return url.trim().to_string();
    }

    let pinned = specifier
        .strip_prefix("===")
        .or_else(|| specifier.strip_prefix("=="))
        .map(str::trim)
        .filter(|version| !version.contains([',', '*']));
    match pinned {
        Some(version) => version.to_string(),
        None => specifier.replace(' ', ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn versions(content: &str) -> Vec<String> {
        parse_requirements(content).iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn test_pinned_requirements() {
        let content = "Django==2.0.5\nrequests === 2.18.4\n";
        assert_eq!(versions(content), vec!["Django@2.0.5", "requests@2.18.4"]);
    }

    #[test]
    fn test_ranges_extras_and_markers() {
        let content = "\
celery[redis]>=4.1,<5.0
six
pywin32==223; sys_platform == 'win32'
Flask == 1.0.*
mylib @ https://example.com/mylib-1.0.tar.gz
";
        assert_eq!(
            versions(content),
            vec![
                "celery@>=4.1,<5.0",
                "six@unspecified",
                "pywin32@223",
                "Flask@==1.0.*",
                "mylib@https://example.com/mylib-1.0.tar.gz",
            ]
        );
    }

    #[test]
    fn test_options_comments_and_continuations() {
        let content = "\
# production requirements
-r base.txt
--index-url https://pypi.example.com/simple
-e git+https://github.com/acme/tool.git#egg=tool
./vendor/local-package
gunicorn==19.8.1  # web server
numpy==1.14.3 \\
    --hash=sha256:0db6fd4a
";
        assert_eq!(versions(content), vec!["gunicorn@19.8.1", "numpy@1.14.3"]);
    }

    #[tokio::test]
    async fn test_setup_py_is_unsupported() {
        let temp_dir = TempDir::new().unwrap();
        let setup = temp_dir.path().join("setup.py");
        fs::write(&setup, "from setuptools import setup\nsetup()\n").unwrap();

        let resolver = PipResolver::new(&ResolverContext::default());
        let results = resolver.resolve(&[setup.clone()]).await;
        assert!(matches!(results[&setup], Err(ResolutionError::UnsupportedFile { .. })));
    }

    #[tokio::test]
    async fn test_requirements_root_is_directory() {
        let temp_dir = TempDir::new().unwrap();
        let service = temp_dir.path().join("billing");
        fs::create_dir(&service).unwrap();
        let requirements = service.join("requirements.txt");
        fs::write(&requirements, "Django==2.0.5\n").unwrap();

        let resolver = PipResolver::new(&ResolverContext::default());
        let results = resolver.resolve(&[requirements.clone()]).await;
        let root = results[&requirements].as_ref().unwrap();
        assert_eq!(root.to_string(), "billing@unspecified");
        assert_eq!(root.children().len(), 1);
    }
}
