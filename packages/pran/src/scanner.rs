use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::ScanError;
use crate::managers::PackageManager;

#[derive(Debug, Clone, PartialEq)]
pub struct ScanOptions {
    /// Directory names never descended into
    pub exclude_dirs: Vec<String>,
    pub follow_links: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            exclude_dirs: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                "bower_components".to_string(),
            ],
            follow_links: true,
        }
    }
}

/// Definition files found by a scan, grouped by package manager.
///
/// Managers appear in the order they were given to [`scan`]; managers without
/// files are left out. Each file list is sorted and free of duplicates.
#[derive(Debug, Default)]
pub struct ScanBucket {
    entries: Vec<(Arc<PackageManager>, Vec<PathBuf>)>,
    warnings: Vec<ScanError>,
}

impl ScanBucket {
    pub fn entries(&self) -> &[(Arc<PackageManager>, Vec<PathBuf>)] {
        &self.entries
    }

    /// Files bucketed for the manager with the given identity.
    pub fn files(&self, manager: &str) -> Option<&[PathBuf]> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate.id().eq_ignore_ascii_case(manager))
            .map(|(_, files)| files.as_slice())
    }

    pub fn warnings(&self) -> &[ScanError] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of bucketed files.
    pub fn file_count(&self) -> usize {
        self.entries.iter().map(|(_, files)| files.len()).sum()
    }

    pub fn into_parts(self) -> (Vec<(Arc<PackageManager>, Vec<PathBuf>)>, Vec<ScanError>) {
        (self.entries, self.warnings)
    }
}

/// Files one manager claims: the best-priority matches per directory, plus
/// files named explicitly as roots.
#[derive(Default)]
struct Candidates {
    by_dir: BTreeMap<PathBuf, (usize, BTreeSet<PathBuf>)>,
    explicit: BTreeSet<PathBuf>,
}

impl Candidates {
    fn offer(&mut self, dir: PathBuf, file: PathBuf, priority: usize) {
        let (best, files) = self
            .by_dir
            .entry(dir)
            .or_insert_with(|| (priority, BTreeSet::new()));

        if priority < *best {
            *best = priority;
            files.clear();
        }
        if priority == *best {
            files.insert(file);
        }
    }

    fn into_files(self) -> Vec<PathBuf> {
        let mut files = self.explicit;
        for (_, (_, dir_files)) in self.by_dir {
            files.extend(dir_files);
        }
        files.into_iter().collect()
    }
}

/// Find the definition files of `managers` under `roots`.
///
/// A root that is a regular file is taken as a definition file of the only
/// active manager, whatever its name, when exactly one manager is active.
/// Otherwise every file below a root is offered to each manager's matcher;
/// per directory a manager keeps only the files matching its earliest pattern.
/// Unreadable paths are recorded as warnings and skipped.
pub fn scan<P: AsRef<Path>>(roots: &[P], managers: &[Arc<PackageManager>], options: &ScanOptions) -> ScanBucket {
    let mut candidates: Vec<Candidates> = managers.iter().map(|_| Candidates::default()).collect();
    let mut warnings = Vec::new();

    for root in roots {
        let root = root.as_ref();
        let canonical = match fs::canonicalize(root) {
            Ok(canonical) => canonical,
            Err(e) => {
                warn!("Skipping {}: {}", root.display(), e);
                warnings.push(ScanError::RootUnavailable {
                    path: root.to_path_buf(),
                    details: e.to_string(),
                });
                continue;
            }
        };

        if canonical.is_file() {
            if let [manager] = managers {
                debug!("Using {} as a {} definition file", canonical.display(), manager.id());
                candidates[0].explicit.insert(canonical);
            } else {
                classify(root, &canonical, managers, &mut candidates);
            }
            continue;
        }

        info!("Scanning {}", canonical.display());
        walk(&canonical, managers, options, &mut candidates, &mut warnings);
    }

    let entries = managers
        .iter()
        .zip(candidates)
        .map(|(manager, candidates)| (Arc::clone(manager), candidates.into_files()))
        .filter(|(_, files)| !files.is_empty())
        .collect();

    ScanBucket { entries, warnings }
}

fn walk(
    root: &Path,
    managers: &[Arc<PackageManager>],
    options: &ScanOptions,
    candidates: &mut [Candidates],
    warnings: &mut Vec<ScanError>,
) {
    let mut visited = HashSet::new();

    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if !entry.file_type().is_dir() {
                return true;
            }
            if entry.depth() > 0
                && options
                    .exclude_dirs
                    .iter()
                    .any(|excluded| entry.file_name() == excluded.as_str())
            {
                debug!("Skipping excluded directory {}", entry.path().display());
                return false;
            }
            // A directory reached again through a link is not descended twice.
            match fs::canonicalize(entry.path()) {
                Ok(canonical) => visited.insert(canonical),
                Err(_) => true,
            }
        });

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                let path = fs::canonicalize(entry.path()).unwrap_or_else(|_| entry.path().to_path_buf());
                classify(entry.path(), &path, managers, candidates);
            }
            Ok(_) => {}
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                warn!("Skipping {}: {}", path.display(), e);
                warnings.push(ScanError::Unreadable {
                    path,
                    details: e.to_string(),
                });
            }
        }
    }
}

/// Match the file under the name it was found by, and record it by its canonical path.
fn classify(found: &Path, canonical: &Path, managers: &[Arc<PackageManager>], candidates: &mut [Candidates]) {
    let dir = found.parent().map(Path::to_path_buf).unwrap_or_default();
    for (manager, candidates) in managers.iter().zip(candidates.iter_mut()) {
        if let Some(priority) = manager.matcher().priority(found) {
            debug!("{} matches {} (pattern {})", found.display(), manager.id(), priority);
            candidates.offer(dir.clone(), canonical.to_path_buf(), priority);
        }
    }
}
