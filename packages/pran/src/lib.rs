//! Dependency provenance for multi-ecosystem projects.
//!
//! A scan walks project roots, recognizes the definition files of every
//! active package manager, and resolves each file into a dependency tree,
//! either by reading a lockfile or by asking the ecosystem's own tool.
//!
//! ```no_run
//! use pran::config::Config;
//! use pran::managers::Registry;
//! use pran::orchestrator::Orchestrator;
//! use std::path::PathBuf;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::default();
//! let registry = Registry::new(&config.resolver_context())?;
//! let orchestrator = Orchestrator::new(registry.managers().to_vec(), config.scan_options());
//! let outcome = orchestrator.run(&[PathBuf::from(".")]).await;
//! for (path, entry) in &outcome.report {
//!     println!("{} ({}): {}", path.display(), entry.manager, entry.root);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod managers;
pub mod matcher;
pub mod orchestrator;
pub mod scanner;
pub mod tool;
pub mod types;

pub use error::{ConfigurationError, ResolutionError, ScanError};
pub use types::{Dependency, Scope};
