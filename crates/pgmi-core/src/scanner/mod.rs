pub mod classify;
pub mod walk;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::checksum;
use crate::error::{Error, ValidationIssue};
use crate::metadata::{self, Metadata};

pub use classify::Classification;

/// One scanned project file. Built fresh on every scan.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: String,
    pub name: String,
    pub directory: String,
    pub extension: String,
    pub depth: usize,
    pub content: Vec<u8>,
    pub raw_checksum: String,
    pub normalized_checksum: String,
    /// Present for SQL files outside test trees.
    pub metadata: Option<Metadata>,
    pub classification: Classification,
    pub is_sql: bool,
}

impl FileRecord {
    pub fn content_text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    pub fn size_bytes(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn is_test_tree(&self) -> bool {
        self.classification != Classification::Deployment
    }
}

#[derive(Debug, Clone)]
pub struct ScanResult {
    pub root: PathBuf,
    pub files: Vec<FileRecord>,
    /// Explicit ids declared by more than one file.
    pub duplicate_ids: BTreeMap<Uuid, Vec<String>>,
    /// Malformed metadata and reserved directory names.
    pub issues: Vec<ValidationIssue>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanStats {
    pub deployment: usize,
    pub setup: usize,
    pub test: usize,
    pub other: usize,
    pub explicit_ids: usize,
}

impl ScanResult {
    /// Every problem found, duplicates first. Empty when the project is valid.
    pub fn all_issues(&self) -> Vec<ValidationIssue> {
        let mut issues: Vec<ValidationIssue> = self
            .duplicate_ids
            .iter()
            .map(|(id, paths)| ValidationIssue::DuplicateId {
                id: *id,
                paths: paths.clone(),
            })
            .collect();
        issues.extend(self.issues.iter().cloned());
        issues
    }

    pub fn validate(&self) -> Result<(), Error> {
        let issues = self.all_issues();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(issues))
        }
    }

    pub fn deployment_files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.iter().filter(|f| !f.is_test_tree())
    }

    pub fn test_files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.iter().filter(|f| f.is_test_tree())
    }

    pub fn stats(&self) -> ScanStats {
        let mut stats = ScanStats::default();
        for file in &self.files {
            match file.classification {
                Classification::Deployment if file.is_sql => stats.deployment += 1,
                Classification::Deployment => stats.other += 1,
                Classification::Setup => stats.setup += 1,
                Classification::Test => stats.test += 1,
            }
            if file.metadata.as_ref().map_or(false, |m| !m.is_fallback()) {
                stats.explicit_ids += 1;
            }
        }
        stats
    }
}

/// Walks `root`, classifies every file and attaches checksums and metadata.
/// Never writes to the project.
pub fn scan_directory(root: &Path) -> Result<ScanResult, Error> {
    if !root.is_dir() {
        return Err(Error::ProjectNotFound(format!(
            "project directory {} does not exist or is not a directory",
            root.display()
        )));
    }

    let start = Instant::now();
    let walked = walk::list_files(root).map_err(|err| match err.kind() {
        std::io::ErrorKind::PermissionDenied => {
            Error::ProjectNotFound(format!("project directory {} is not readable", root.display()))
        }
        _ => Error::Io(err),
    })?;

    let mut files = Vec::with_capacity(walked.len());
    let mut issues = Vec::new();
    let mut ids: BTreeMap<Uuid, Vec<String>> = BTreeMap::new();

    for entry in walked {
        if classify::is_deploy_script(&entry.path) {
            continue;
        }

        let name = classify::file_name(&entry.path).to_string();
        let extension = classify::extension_of(&name).to_string();
        let is_sql = classify::is_sql_extension(&extension);
        let classification = classify::classify(&entry.path);

        if classification != Classification::Deployment && !is_sql {
            debug!("Skipping non-SQL file in test tree: {}", entry.path);
            continue;
        }

        if let Some(segment) = classify::reserved_directory(&entry.path) {
            issues.push(ValidationIssue::ReservedDirectory {
                path: entry.path.clone(),
                segment: segment.to_string(),
            });
        }

        let content = fs::read(&entry.absolute)?;

        let metadata = if is_sql && classification == Classification::Deployment {
            let extraction = metadata::extract(&String::from_utf8_lossy(&content), &entry.path);
            if let Some(err) = extraction.error {
                warn!("Invalid metadata in {}: {}", entry.path, err);
                issues.push(ValidationIssue::InvalidMetadata {
                    path: entry.path.clone(),
                    reason: err.to_string(),
                });
            } else if !extraction.metadata.is_fallback() {
                ids.entry(extraction.metadata.id)
                    .or_default()
                    .push(entry.path.clone());
            }
            Some(extraction.metadata)
        } else {
            None
        };

        let directory = classify::directory_of(&entry.path).to_string();
        files.push(FileRecord {
            depth: classify::directory_depth(&directory),
            directory,
            name,
            extension,
            raw_checksum: checksum::raw_checksum(&content),
            normalized_checksum: checksum::normalized_checksum(&content),
            content,
            metadata,
            classification,
            is_sql,
            path: entry.path,
        });
    }

    ids.retain(|_, paths| paths.len() > 1);

    let result = ScanResult {
        root: root.to_path_buf(),
        files,
        duplicate_ids: ids,
        issues,
    };

    let stats = result.stats();
    info!(
        "Scanned {} files in {:.2}s ({} deployment, {} setup, {} test, {} other)",
        result.files.len(),
        start.elapsed().as_secs_f64(),
        stats.deployment,
        stats.setup,
        stats.test,
        stats.other,
    );

    Ok(result)
}

/// Reads the project's `deploy.sql` (file name matched case-insensitively).
pub fn read_deploy_script(root: &Path) -> Result<String, Error> {
    let entries = fs::read_dir(root).map_err(|err| {
        Error::ProjectNotFound(format!("cannot read project directory {}: {}", root.display(), err))
    })?;
    for entry in entries {
        let entry = entry?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if is_file
            && entry
                .file_name()
                .to_string_lossy()
                .eq_ignore_ascii_case(classify::DEPLOY_SCRIPT)
        {
            return Ok(fs::read_to_string(entry.path())?);
        }
    }
    Err(Error::NotFound(format!(
        "{} not found in {}; every project needs an orchestration script at its root",
        classify::DEPLOY_SCRIPT,
        root.display()
    )))
}
