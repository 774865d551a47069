use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::{ResolutionError, ScanError};
use crate::managers::PackageManager;
use crate::scanner::{self, ScanOptions};
use crate::types::{Dependency, Resolution};

/// A resolved definition file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntry {
    pub manager: String,
    pub root: Dependency,
}

/// Resolved trees keyed by canonical definition file path.
pub type ProvenanceReport = BTreeMap<PathBuf, ReportEntry>;

/// A definition file that could not be resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvenanceError {
    pub manager: String,
    pub path: PathBuf,
    pub error: ResolutionError,
}

/// Everything a run produced: the report, the files that failed, and the paths the scan skipped.
#[derive(Debug, Default)]
pub struct ProvenanceOutcome {
    pub report: ProvenanceReport,
    pub errors: Vec<ProvenanceError>,
    pub warnings: Vec<ScanError>,
}

impl ProvenanceOutcome {
    /// No file failed and the scan ran to completion.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.warnings.iter().any(ScanError::is_fatal)
    }
}

/// Scans project roots and resolves every definition file found with the
/// managers that claimed it.
pub struct Orchestrator {
    managers: Vec<Arc<PackageManager>>,
    options: ScanOptions,
}

impl Orchestrator {
    pub fn new(managers: Vec<Arc<PackageManager>>, options: ScanOptions) -> Self {
        Self { managers, options }
    }

    /// Managers resolve concurrently, each with its whole file list. A failing
    /// file or manager never discards results obtained for the others.
    pub async fn run(&self, roots: &[PathBuf]) -> ProvenanceOutcome {
        let mut outcome = ProvenanceOutcome::default();

        let bucket = {
            let roots = roots.to_vec();
            let managers = self.managers.clone();
            let options = self.options.clone();
            tokio::task::spawn_blocking(move || scanner::scan(&roots, &managers, &options)).await
        };
        let (entries, warnings) = match bucket {
            Ok(bucket) => bucket.into_parts(),
            Err(e) => {
                warn!("Scan task failed: {}", e);
                outcome.warnings.push(ScanError::Interrupted { details: e.to_string() });
                return outcome;
            }
        };
        outcome.warnings = warnings;

        let mut tasks = JoinSet::new();
        for (index, (manager, files)) in entries.into_iter().enumerate() {
            info!("Resolving {} {} definition file(s)", files.len(), manager.id());
            tasks.spawn(async move {
                let resolver = {
                    let manager = Arc::clone(&manager);
                    let files = files.clone();
                    tokio::spawn(async move { manager.resolve(&files).await })
                };
                let results = match resolver.await {
                    Ok(results) => results,
                    Err(e) => files
                        .iter()
                        .map(|file| {
                            let error = ResolutionError::TaskFailed { details: e.to_string() };
                            (file.clone(), Err(error))
                        })
                        .collect(),
                };
                (index, manager, files, results)
            });
        }

        let mut batches: Vec<(usize, String, BTreeMap<PathBuf, Resolution>)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, manager, files, mut results)) => {
                    // A strategy that drops a file still has it accounted for.
                    for file in files {
                        results.entry(file).or_insert_with(|| {
                            Err(ResolutionError::TaskFailed {
                                details: "no result was produced".to_string(),
                            })
                        });
                    }
                    batches.push((index, manager.id().to_string(), results));
                }
                Err(e) => warn!("Resolution task failed: {}", e),
            }
        }

        // Registry order decides which manager keeps a contested path.
        batches.sort_by_key(|(index, _, _)| *index);
        for (_, manager, results) in batches {
            for (path, resolution) in results {
                match resolution {
                    Ok(root) => {
                        if let Some(existing) = outcome.report.get(&path) {
                            warn!(
                                "{} was also resolved by {}, keeping the result of {}",
                                path.display(),
                                manager,
                                existing.manager
                            );
                            continue;
                        }
                        outcome.report.insert(
                            path,
                            ReportEntry {
                                manager: manager.clone(),
                                root,
                            },
                        );
                    }
                    Err(error) => {
                        warn!("Failed to resolve {} with {}: {}", path.display(), manager, error);
                        outcome.errors.push(ProvenanceError {
                            manager: manager.clone(),
                            path,
                            error,
                        });
                    }
                }
            }
        }

        outcome
    }
}
