use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::ResolutionError;

/// Lines of stderr kept in [`ResolutionError::ExternalToolFailed`].
const STDERR_TAIL_LINES: usize = 20;

/// An ecosystem's command line tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tool {
    /// Key under `[tools]` in the configuration, and the unix program name.
    pub name: &'static str,
    windows_program: &'static str,
    /// Project-local wrapper scripts (unix, windows) preferred over the global program.
    wrapper: Option<(&'static str, &'static str)>,
}

pub const NPM: Tool = Tool {
    name: "npm",
    windows_program: "npm.cmd",
    wrapper: None,
};

pub const YARN: Tool = Tool {
    name: "yarn",
    windows_program: "yarn.cmd",
    wrapper: None,
};

pub const BOWER: Tool = Tool {
    name: "bower",
    windows_program: "bower.cmd",
    wrapper: None,
};

pub const MAVEN: Tool = Tool {
    name: "mvn",
    windows_program: "mvn.cmd",
    wrapper: Some(("mvnw", "mvnw.cmd")),
};

pub const GRADLE: Tool = Tool {
    name: "gradle",
    windows_program: "gradle.bat",
    wrapper: Some(("gradlew", "gradlew.bat")),
};

pub const SBT: Tool = Tool {
    name: "sbt",
    windows_program: "sbt.bat",
    wrapper: None,
};

/// User override for how a tool is launched. `args` go before the strategy's own arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Runs external tools with a working directory and a per-invocation timeout.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    overrides: HashMap<String, ToolCommand>,
    timeout: Duration,
}

impl ToolRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            overrides: HashMap::new(),
            timeout,
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, ToolCommand>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_override(mut self, tool: &str, command: ToolCommand) -> Self {
        self.overrides.insert(tool.to_string(), command);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command_line(&self, tool: &Tool, dir: &Path) -> (String, Vec<String>) {
        if let Some(command) = self.overrides.get(tool.name) {
            return (command.program.clone(), command.args.clone());
        }

        if let Some(wrapper) = tool.wrapper.and_then(|names| find_wrapper(dir, names)) {
            return (wrapper.to_string_lossy().to_string(), Vec::new());
        }

        let program = if cfg!(windows) {
            tool.windows_program
        } else {
            tool.name
        };
        (program.to_string(), Vec::new())
    }

    /// Run `tool` in `dir` and return its stdout.
    pub async fn run(&self, tool: &Tool, dir: &Path, args: &[&str]) -> Result<String, ResolutionError> {
        let (program, output) = self.output(tool, dir, args).await?;
        if !output.status.success() {
            return Err(failure(&output));
        }

        String::from_utf8(output.stdout).map_err(|e| {
            ResolutionError::malformed(format!("{} wrote non UTF-8 output: {}", program, e))
        })
    }

    /// Run `tool` in `dir` and parse its stdout as a single JSON document.
    pub async fn run_json(
        &self,
        tool: &Tool,
        dir: &Path,
        args: &[&str],
    ) -> Result<serde_json::Value, ResolutionError> {
        let stdout = self.run(tool, dir, args).await?;
        serde_json::from_str(&stdout)
            .map_err(|e| ResolutionError::malformed(format!("{} did not print valid JSON: {}", tool.name, e)))
    }

    /// Like [`ToolRunner::run_json`], for tools that exit with 1 when the
    /// report they print describes problems. Such an exit is accepted when
    /// stdout holds a JSON object.
    pub async fn run_json_report(
        &self,
        tool: &Tool,
        dir: &Path,
        args: &[&str],
    ) -> Result<serde_json::Value, ResolutionError> {
        let (program, output) = self.output(tool, dir, args).await?;
        let document = serde_json::from_slice::<serde_json::Value>(&output.stdout);

        if output.status.success() {
            return document
                .map_err(|e| ResolutionError::malformed(format!("{} did not print valid JSON: {}", tool.name, e)));
        }
        match document {
            Ok(document) if output.status.code() == Some(1) && document.is_object() => {
                debug!("{} exited with 1 but printed a report", program);
                Ok(document)
            }
            _ => Err(failure(&output)),
        }
    }

    async fn output(&self, tool: &Tool, dir: &Path, args: &[&str]) -> Result<(String, Output), ResolutionError> {
        let (program, mut command_args) = self.command_line(tool, dir);
        command_args.extend(args.iter().map(|arg| arg.to_string()));

        debug!("Running {} {} in {}", program, command_args.join(" "), dir.display());

        let child = Command::new(&program)
            .args(&command_args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ResolutionError::ToolUnavailable {
                program: program.clone(),
                details: e.to_string(),
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok((program, output)),
            Ok(Err(e)) => Err(ResolutionError::TaskFailed {
                details: format!("Failed to wait for {}: {}", program, e),
            }),
            Err(_) => {
                debug!("{} timed out after {:?}", program, self.timeout);
                Err(ResolutionError::Timeout {
                    timeout: self.timeout,
                })
            }
        }
    }
}

fn failure(output: &Output) -> ResolutionError {
    ResolutionError::ExternalToolFailed {
        exit_code: output.status.code(),
        stderr: tail(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL_LINES),
    }
}

/// Look for a wrapper script in `dir` and its ancestors.
fn find_wrapper(dir: &Path, (unix, windows): (&str, &str)) -> Option<PathBuf> {
    let name = if cfg!(windows) { windows } else { unix };
    dir.ancestors()
        .map(|ancestor| ancestor.join(name))
        .find(|candidate| candidate.is_file())
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
