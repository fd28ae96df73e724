//! Path conventions for project trees.

pub const DEPLOY_SCRIPT: &str = "deploy.sql";

pub const TEST_MARKERS: [&str; 2] = ["__test__", "__tests__"];

const SETUP_FILES: [&str; 2] = ["_setup.sql", "_setup.psql"];

const SQL_EXTENSIONS: [&str; 8] = [
    ".sql", ".ddl", ".dml", ".dql", ".dcl", ".psql", ".pgsql", ".plpgsql",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Classification {
    Deployment,
    Setup,
    Test,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Deployment => "deployment",
            Classification::Setup => "setup",
            Classification::Test => "test",
        }
    }
}

pub fn classify(path: &str) -> Classification {
    if !is_test_path(path) {
        Classification::Deployment
    } else if is_setup_file(path) {
        Classification::Setup
    } else {
        Classification::Test
    }
}

/// True when any directory segment is a test marker.
pub fn is_test_path(path: &str) -> bool {
    directory_segments(path).any(|segment| TEST_MARKERS.contains(&segment))
}

pub fn is_setup_file(path: &str) -> bool {
    let name = file_name(path).to_lowercase();
    SETUP_FILES.contains(&name.as_str())
}

pub fn is_sql_extension(extension: &str) -> bool {
    let ext = extension.to_lowercase();
    SQL_EXTENSIONS.contains(&ext.as_str())
}

pub fn is_deploy_script(path: &str) -> bool {
    file_name(path).eq_ignore_ascii_case(DEPLOY_SCRIPT)
}

/// Returns the first `__name__` directory that is not a test marker.
pub fn reserved_directory(path: &str) -> Option<&str> {
    directory_segments(path).find(|segment| {
        segment.len() > 4
            && segment.starts_with("__")
            && segment.ends_with("__")
            && !TEST_MARKERS.contains(segment)
    })
}

/// `./a/b/c.sql` -> `./a/b/`
pub fn directory_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "./",
    }
}

/// Number of directory levels below the project root: `./` is 0, `./a/` is 1.
pub fn directory_depth(directory: &str) -> usize {
    directory.matches('/').count().saturating_sub(1)
}

/// Depth of a test directory counted from its marker segment, which is 0.
pub fn test_directory_depth(directory: &str) -> usize {
    let segments: Vec<&str> = directory
        .trim_end_matches('/')
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    match segments.iter().position(|s| TEST_MARKERS.contains(s)) {
        Some(marker) => segments.len() - marker - 1,
        None => 0,
    }
}

/// The test directory itself and every ancestor up to and including its marker.
pub fn test_directory_chain(directory: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = directory.to_string();
    loop {
        chain.push(current.clone());
        let trimmed = current.trim_end_matches('/');
        let last = trimmed.rsplit('/').next().unwrap_or("");
        if TEST_MARKERS.contains(&last) {
            break;
        }
        match trimmed.rfind('/') {
            Some(idx) if is_test_path(&format!("{}/x", &trimmed[..idx])) => {
                current = trimmed[..=idx].to_string();
            }
            _ => break,
        }
    }
    chain
}

pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn extension_of(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[idx..],
        _ => "",
    }
}

fn directory_segments(path: &str) -> impl Iterator<Item = &str> {
    let dir = match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    };
    dir.split('/').filter(|s| !s.is_empty() && *s != ".")
}
