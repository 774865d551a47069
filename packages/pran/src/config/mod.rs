use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigurationError;
use crate::managers::ResolverContext;
use crate::scanner::ScanOptions;
use crate::tool::{ToolCommand, ToolRunner};

/// File names looked up in the current directory, in order.
const LOCAL_CONFIG_FILES: &[&str] = &[".pran.toml", "pran.toml"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,

    /// How external tools are launched, keyed by tool name (npm, yarn, bower, mvn, gradle, sbt)
    #[serde(default)]
    pub tools: HashMap<String, ToolCommand>,

    /// Per package manager configuration, keyed by manager name
    #[serde(default)]
    pub managers: HashMap<String, ManagerConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GlobalConfig {
    /// Seconds an external tool may run before it is terminated
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout: u64,

    /// Definition files of one package manager resolved at the same time
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Follow symbolic links while scanning
    #[serde(default = "default_follow_links")]
    pub follow_links: bool,

    /// Directory names never descended into
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,

    /// Package managers used when none are given on the command line; empty means all
    #[serde(default)]
    pub package_managers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManagerConfig {
    /// Replaces the built-in definition file patterns, highest priority first
    pub definition_files: Option<Vec<String>>,
}

fn default_tool_timeout() -> u64 {
    300
}

fn default_jobs() -> usize {
    4
}

fn default_follow_links() -> bool {
    true
}

fn default_exclude_dirs() -> Vec<String> {
    [".git", "node_modules", "bower_components"]
        .iter()
        .map(|dir| dir.to_string())
        .collect()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            tool_timeout: default_tool_timeout(),
            jobs: default_jobs(),
            follow_links: default_follow_links(),
            exclude_dirs: default_exclude_dirs(),
            package_managers: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let invalid = |details: String| ConfigurationError::InvalidConfigFile {
            path: path.to_path_buf(),
            details,
        };

        let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let config: Config = toml::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        if config.global.jobs == 0 {
            return Err(invalid("jobs must be at least 1".to_string()));
        }
        Ok(config)
    }

    /// Load the explicit file if given, else the first existing file of the
    /// default locations, else the defaults. A file that exists but does not
    /// parse is an error, not a fallback.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigurationError> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        for path in Self::default_locations() {
            if path.is_file() {
                return Ok((Self::load(&path)?, Some(path)));
            }
        }

        Ok((Self::default(), None))
    }

    /// Local files first, then the user config directory
    pub fn default_locations() -> Vec<PathBuf> {
        let mut locations: Vec<PathBuf> = LOCAL_CONFIG_FILES.iter().map(PathBuf::from).collect();
        if let Some(config_dir) = dirs::config_dir() {
            locations.push(config_dir.join("pran").join("config.toml"));
        }
        locations
    }

    /// Save config to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.global.tool_timeout)
    }

    pub fn tool_runner(&self) -> ToolRunner {
        ToolRunner::new(self.tool_timeout()).with_overrides(self.tools.clone())
    }

    pub fn resolver_context(&self) -> ResolverContext {
        ResolverContext::new(self.tool_runner(), self.global.jobs)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            exclude_dirs: self.global.exclude_dirs.clone(),
            follow_links: self.global.follow_links,
        }
    }

    /// Definition file pattern overrides keyed by manager name
    pub fn pattern_overrides(&self) -> HashMap<String, Vec<String>> {
        self.managers
            .iter()
            .filter_map(|(name, manager)| {
                manager
                    .definition_files
                    .as_ref()
                    .map(|patterns| (name.clone(), patterns.clone()))
            })
            .collect()
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# pran configuration file

[global]
# Seconds an external tool (npm, yarn, mvn, ...) may run before it is terminated
tool-timeout = 300

# Definition files of one package manager resolved at the same time
jobs = 4

# Follow symbolic links while scanning
follow-links = true

# Directory names never descended into
exclude-dirs = [".git", "node_modules", "bower_components"]

# Package managers used when -m is not given; empty means all
# package-managers = ["NPM", "Bundler"]

# How external tools are launched. `args` go before pran's own arguments.
[tools.yarn]
program = "yarn"

# [tools.mvn]
# program = "/opt/maven/bin/mvn"
# args = ["-o"]

# Replace the definition file patterns of a package manager, highest priority first
[managers.PIP]
definition-files = ["requirements*.txt", "setup.py"]

# [managers.NPM]
# definition-files = ["npm-shrinkwrap.json", "package.json"]
"#;
