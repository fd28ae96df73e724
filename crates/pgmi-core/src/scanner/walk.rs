use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, error};
use walkdir::{DirEntry, WalkDir};

/// A regular file found under the project root.
#[derive(Debug, Clone)]
pub struct WalkedFile {
    /// `./`-prefixed, forward-slash path relative to the root.
    pub path: String,
    pub absolute: PathBuf,
}

/// Lists project files in lexicographic order. Hidden entries are skipped and
/// symlinks are not followed. Unreadable subdirectories are logged and skipped.
pub fn list_files(root: &Path) -> io::Result<Vec<WalkedFile>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

    for entry_result in walker {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(|p| p.display().to_string()).unwrap_or_default();
                match err.io_error().map(|e| e.kind()) {
                    Some(io::ErrorKind::PermissionDenied) if err.depth() > 0 => {
                        error!("Access denied reading {}: {}", path, err);
                        continue;
                    }
                    _ => {
                        return Err(io::Error::new(
                            io::ErrorKind::Other,
                            format!("Error walking {}: {}", path, err),
                        ))
                    }
                }
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let path = to_project_path(relative);
        debug!("Found {}", path);
        files.push(WalkedFile {
            path,
            absolute: entry.path().to_path_buf(),
        });
    }

    Ok(files)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn to_project_path(relative: &Path) -> String {
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("./{}", joined)
}
