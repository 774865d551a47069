use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use pran::config::{Config, EXAMPLE_CONFIG};
use pran::managers::Registry;
use pran::orchestrator::{Orchestrator, ProvenanceOutcome, ProvenanceReport};
use pran::Dependency;

#[derive(Parser)]
#[command(name = "pran")]
#[command(about = "Resolve the dependency trees of every package manager a project uses", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
}

#[derive(Subcommand)]
enum Commands {
    /// Find definition files and resolve their dependency trees
    Scan {
        /// Project directories or definition files
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,

        /// Package managers to use, comma separated (see `pran list`)
        #[arg(short = 'm', long, value_delimiter = ',')]
        package_managers: Vec<String>,

        /// Output format
        #[arg(short = 'o', long, value_enum)]
        output: Option<OutputFormat>,

        /// Print each file's sorted, de-duplicated package list instead of the tree
        #[arg(long)]
        flat: bool,

        /// Seconds an external tool may run before it is terminated
        #[arg(long)]
        timeout: Option<u64>,

        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// List the known package managers
    List {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to write config file
        #[arg(default_value = ".pran.toml")]
        path: PathBuf,

        /// Force overwrite existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            paths,
            package_managers,
            output,
            flat,
            timeout,
            config,
            verbose,
        } => {
            init_logging(verbose);
            let success = run_scan(&paths, &package_managers, output, flat, timeout, config.as_deref()).await?;
            if !success {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::List { config } => {
            init_logging(false);
            run_list(config.as_deref())
        }
        Commands::InitConfig { path, force } => run_init_config(&path, force),
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "pran=debug,warn" } else { "warn" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_registry(config_path: Option<&Path>, timeout: Option<u64>) -> Result<(Config, Registry)> {
    let (mut config, source) = Config::discover(config_path).context("Failed to load configuration")?;
    if let Some(source) = source {
        tracing::debug!("Loaded configuration from {}", source.display());
    }
    if let Some(timeout) = timeout {
        config.global.tool_timeout = timeout;
    }

    let (registry, errors) = Registry::with_patterns(&config.resolver_context(), &config.pattern_overrides());
    for error in errors {
        eprintln!("{} {}", "warning:".yellow().bold(), error);
    }

    Ok((config, registry))
}

async fn run_scan(
    paths: &[PathBuf],
    package_managers: &[String],
    output: Option<OutputFormat>,
    flat: bool,
    timeout: Option<u64>,
    config_path: Option<&Path>,
) -> Result<bool> {
    let (config, registry) = load_registry(config_path, timeout)?;

    let names = if package_managers.is_empty() {
        config.global.package_managers.clone()
    } else {
        package_managers.to_vec()
    };

    let managers = if names.is_empty() {
        registry.managers().to_vec()
    } else {
        let selection = registry.select(&names);
        for name in &selection.unknown {
            tracing::warn!("Ignoring unknown package manager '{}'", name);
            eprintln!(
                "{} unknown package manager '{}', run `pran list` to see the known ones",
                "warning:".yellow().bold(),
                name
            );
        }
        selection.managers
    };

    if managers.is_empty() {
        eprintln!(
            "{} no known package manager selected, nothing will be resolved",
            "warning:".yellow().bold()
        );
    }

    let orchestrator = Orchestrator::new(managers, config.scan_options());
    let outcome = orchestrator.run(paths).await;

    match output {
        Some(OutputFormat::Json) => {
            println!("{}", serde_json::to_string_pretty(&SerializedOutcome::from(&outcome))?);
        }
        Some(OutputFormat::Yaml) => {
            print!("{}", serde_yaml::to_string(&SerializedOutcome::from(&outcome))?);
        }
        Some(OutputFormat::Text) | None => print_text(&outcome, flat),
    }

    Ok(outcome.is_success())
}

#[derive(Serialize)]
struct SerializedOutcome<'a> {
    report: &'a ProvenanceReport,
    errors: Vec<SerializedError>,
    warnings: Vec<String>,
}

#[derive(Serialize)]
struct SerializedError {
    manager: String,
    path: PathBuf,
    error: String,
}

impl<'a> From<&'a ProvenanceOutcome> for SerializedOutcome<'a> {
    fn from(outcome: &'a ProvenanceOutcome) -> Self {
        Self {
            report: &outcome.report,
            errors: outcome
                .errors
                .iter()
                .map(|error| SerializedError {
                    manager: error.manager.clone(),
                    path: error.path.clone(),
                    error: error.error.to_string(),
                })
                .collect(),
            warnings: outcome.warnings.iter().map(|warning| warning.to_string()).collect(),
        }
    }
}

fn print_text(outcome: &ProvenanceOutcome, flat: bool) {
    for warning in &outcome.warnings {
        eprintln!("{} {}", "warning:".yellow().bold(), warning);
    }

    if outcome.report.is_empty() && outcome.errors.is_empty() {
        println!("No definition files found.");
        return;
    }

    println!(
        "\nResolved {} definition files, {} failed:\n",
        outcome.report.len().to_string().bold(),
        outcome.errors.len().to_string().bold()
    );

    for (path, entry) in &outcome.report {
        println!("{} ({})", path.display().to_string().cyan(), entry.manager.blue());
        if flat {
            for (artifact, version) in entry.root.packages() {
                println!("  {} {}", artifact.green(), version.yellow());
            }
        } else {
            println!("  {}", label(&entry.root));
            print_children(&entry.root, "  ");
        }
        println!();
    }

    for error in &outcome.errors {
        println!(
            "{} {} ({})",
            "✗".red().bold(),
            error.path.display().to_string().cyan(),
            error.manager.blue()
        );
        for line in error.error.to_string().lines() {
            println!("    {}", line);
        }
    }
}

fn print_children(node: &Dependency, prefix: &str) {
    let count = node.children().len();
    for (i, child) in node.children().iter().enumerate() {
        let last = i + 1 == count;
        println!("{}{} {}", prefix, if last { "└──" } else { "├──" }, label(child));
        print_children(child, &format!("{}{}", prefix, if last { "    " } else { "│   " }));
    }
}

fn label(node: &Dependency) -> String {
    let mut line = format!("{}@{}", node.artifact().green(), node.version().yellow());
    if node.scope() != pran::Scope::Production {
        line.push_str(&format!(" [{}]", node.scope().to_string().magenta()));
    }
    if node.is_cycle() {
        line.push_str(&format!(" {}", "(cycle)".red()));
    }
    if node.is_repeated() {
        line.push_str(&format!(" {}", "(*)".dimmed()));
    }
    line
}

fn run_list(config_path: Option<&Path>) -> Result<()> {
    let (_, registry) = load_registry(config_path, None)?;

    println!("Known package managers (highest priority first):\n");
    for manager in registry.managers() {
        println!(
            "{:<10} {:<12} {}",
            manager.id().green().bold(),
            manager.primary_language(),
            manager.homepage_url().dimmed()
        );
        println!("           {}", manager.definition_files().join(", ").cyan());
    }

    Ok(())
}

fn run_init_config(path: &Path, force: bool) -> Result<()> {
    // Check if file exists
    if path.exists() && !force {
        return Err(anyhow::anyhow!(
            "Configuration file already exists at {}. Use --force to overwrite.",
            path.display()
        ));
    }

    std::fs::write(path, EXAMPLE_CONFIG)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Created configuration file at: {}", path.display());
    println!("\nEdit this file to customize pran behavior.");
    println!("See comments in the file for available options.");

    Ok(())
}
