//! Test plan built from the scanned test trees.
//!
//! Directories are visited pre-order, sorted by path. Each directory yields
//! its fixtures, then its own tests, then its subdirectories, then a teardown
//! when it had a fixture or tests of its own.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use regex::Regex;

use crate::scanner::{classify, Classification, ScanResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepType {
    Fixture,
    Test,
    Teardown,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Fixture => "fixture",
            StepType::Test => "test",
            StepType::Teardown => "teardown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fixture" => Some(StepType::Fixture),
            "test" => Some(StepType::Test),
            "teardown" => Some(StepType::Teardown),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            StepType::Fixture => "Setup:",
            StepType::Test => "Test:",
            StepType::Teardown => "Teardown:",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    /// 1-based.
    pub ordinal: u32,
    pub step_type: StepType,
    /// `None` for teardown rows.
    pub script_path: Option<String>,
    pub directory: String,
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDirectory {
    pub path: String,
    pub parent_path: Option<String>,
    pub depth: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestPlan {
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanCounts {
    pub tests: usize,
    pub fixtures: usize,
    pub teardowns: usize,
}

impl TestPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn counts(&self) -> PlanCounts {
        let mut counts = PlanCounts::default();
        for step in &self.steps {
            match step.step_type {
                StepType::Test => counts.tests += 1,
                StepType::Fixture => counts.fixtures += 1,
                StepType::Teardown => counts.teardowns += 1,
            }
        }
        counts
    }

    /// Keeps tests whose path matches, plus the fixtures and teardowns of
    /// directories with a kept test at or below them. Ordinals are renumbered.
    pub fn filter(&self, pattern: &Regex) -> TestPlan {
        let selected_dirs: Vec<&str> = self
            .steps
            .iter()
            .filter(|s| s.step_type == StepType::Test && matches(s, pattern))
            .map(|s| s.directory.as_str())
            .collect();

        let steps = self
            .steps
            .iter()
            .filter(|step| match step.step_type {
                StepType::Test => matches(step, pattern),
                StepType::Fixture | StepType::Teardown => selected_dirs
                    .iter()
                    .any(|dir| dir.starts_with(step.directory.as_str())),
            })
            .enumerate()
            .map(|(idx, step)| PlanStep {
                ordinal: idx as u32 + 1,
                ..step.clone()
            })
            .collect();
        TestPlan { steps }
    }

    /// Rows in the `{ordinal}. {label} {path}` form plus a total line.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            let path = step.script_path.as_deref().unwrap_or(&step.directory);
            out.push_str(&format!(
                "{}. {:<8} {}\n",
                step.ordinal,
                step.step_type.label(),
                path
            ));
        }
        let counts = self.counts();
        out.push_str(&format!(
            "\nTotal: {} tests (with {} setup, {} teardown)\n",
            counts.tests, counts.fixtures, counts.teardowns
        ));
        out
    }
}

fn matches(step: &PlanStep, pattern: &Regex) -> bool {
    step.script_path
        .as_deref()
        .map_or(false, |path| pattern.is_match(path))
}

/// Every directory of every test tree, including intermediate ones.
pub fn test_directories(scan: &ScanResult) -> Vec<TestDirectory> {
    let mut dirs: BTreeMap<String, Option<String>> = BTreeMap::new();
    for file in scan.test_files() {
        let chain = classify::test_directory_chain(&file.directory);
        for (idx, dir) in chain.iter().enumerate() {
            dirs.entry(dir.clone())
                .or_insert_with(|| chain.get(idx + 1).cloned());
        }
    }
    dirs.into_iter()
        .map(|(path, parent_path)| TestDirectory {
            depth: classify::test_directory_depth(&path) as u32,
            path,
            parent_path,
        })
        .collect()
}

pub fn build_plan(scan: &ScanResult) -> TestPlan {
    let directories = test_directories(scan);

    let mut fixtures: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut tests: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for file in scan.test_files() {
        let bucket = match file.classification {
            Classification::Setup => &mut fixtures,
            Classification::Test => &mut tests,
            Classification::Deployment => continue,
        };
        bucket
            .entry(file.directory.as_str())
            .or_default()
            .insert(file.path.as_str());
    }

    let mut children: BTreeMap<&str, Vec<&TestDirectory>> = BTreeMap::new();
    let mut roots = Vec::new();
    for dir in &directories {
        match &dir.parent_path {
            Some(parent) => children.entry(parent.as_str()).or_default().push(dir),
            None => roots.push(dir),
        }
    }

    let mut builder = PlanBuilder {
        fixtures: &fixtures,
        tests: &tests,
        children: &children,
        steps: Vec::new(),
    };
    for root in roots {
        builder.visit(root);
    }
    TestPlan {
        steps: builder.steps,
    }
}

struct PlanBuilder<'a> {
    fixtures: &'a BTreeMap<&'a str, BTreeSet<&'a str>>,
    tests: &'a BTreeMap<&'a str, BTreeSet<&'a str>>,
    children: &'a BTreeMap<&'a str, Vec<&'a TestDirectory>>,
    steps: Vec<PlanStep>,
}

impl<'a> PlanBuilder<'a> {
    fn visit(&mut self, dir: &TestDirectory) {
        let key = dir.path.as_str();
        let own_fixtures = self.fixtures.get(key);
        let own_tests = self.tests.get(key);

        for path in own_fixtures.into_iter().flatten() {
            self.push(StepType::Fixture, Some(path), dir);
        }
        for path in own_tests.into_iter().flatten() {
            self.push(StepType::Test, Some(path), dir);
        }
        if let Some(children) = self.children.get(key) {
            for child in children {
                self.visit(child);
            }
        }
        if own_fixtures.is_some() || own_tests.is_some() {
            self.push(StepType::Teardown, None, dir);
        }
    }

    fn push(&mut self, step_type: StepType, path: Option<&str>, dir: &TestDirectory) {
        self.steps.push(PlanStep {
            ordinal: self.steps.len() as u32 + 1,
            step_type,
            script_path: path.map(str::to_string),
            directory: dir.path.clone(),
            depth: dir.depth,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::scan_directory;
    use std::fs;
    use tempfile::tempdir;

    fn project(files: &[&str]) -> (tempfile::TempDir, ScanResult) {
        let tmp = tempdir().unwrap();
        for file in files {
            let path = tmp.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "SELECT 1;").unwrap();
        }
        let scan = scan_directory(tmp.path()).unwrap();
        (tmp, scan)
    }

    fn shape(plan: &TestPlan) -> Vec<(u32, &'static str, String)> {
        plan.steps
            .iter()
            .map(|s| {
                (
                    s.ordinal,
                    s.step_type.as_str(),
                    s.script_path.clone().unwrap_or_else(|| s.directory.clone()),
                )
            })
            .collect()
    }

    #[test]
    fn test_plan_order() {
        let (_tmp, scan) = project(&[
            "schema.sql",
            "__test__/_setup.sql",
            "__test__/test_b.sql",
            "__test__/test_a.sql",
            "__test__/auth/_setup.sql",
            "__test__/auth/test_login.sql",
            "__test__/empty/nested/test_deep.sql",
        ]);
        let plan = build_plan(&scan);
        assert_eq!(
            shape(&plan),
            vec![
                (1, "fixture", "./__test__/_setup.sql".into()),
                (2, "test", "./__test__/test_a.sql".into()),
                (3, "test", "./__test__/test_b.sql".into()),
                (4, "fixture", "./__test__/auth/_setup.sql".into()),
                (5, "test", "./__test__/auth/test_login.sql".into()),
                (6, "teardown", "./__test__/auth/".into()),
                (7, "test", "./__test__/empty/nested/test_deep.sql".into()),
                (8, "teardown", "./__test__/empty/nested/".into()),
                (9, "teardown", "./__test__/".into()),
            ]
        );
        assert_eq!(plan.steps[4].depth, 1);
        assert_eq!(plan.steps[6].depth, 2);
        assert_eq!(
            plan.counts(),
            PlanCounts {
                tests: 4,
                fixtures: 2,
                teardowns: 3
            }
        );
    }

    #[test]
    fn test_directories_include_intermediates() {
        let (_tmp, scan) = project(&["api/__tests__/a/b/test_x.sql"]);
        let dirs = test_directories(&scan);
        let paths: Vec<&str> = dirs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["./api/__tests__/", "./api/__tests__/a/", "./api/__tests__/a/b/"]
        );
        assert_eq!(dirs[0].parent_path, None);
        assert_eq!(dirs[2].parent_path.as_deref(), Some("./api/__tests__/a/"));
        assert_eq!(dirs[2].depth, 2);
    }

    #[test]
    fn test_filter_keeps_enclosing_fixtures() {
        let (_tmp, scan) = project(&[
            "__test__/_setup.sql",
            "__test__/test_root.sql",
            "__test__/auth/_setup.sql",
            "__test__/auth/test_login.sql",
            "__test__/billing/_setup.sql",
            "__test__/billing/test_invoice.sql",
        ]);
        let plan = build_plan(&scan).filter(&Regex::new("login").unwrap());
        assert_eq!(
            shape(&plan),
            vec![
                (1, "fixture", "./__test__/_setup.sql".into()),
                (2, "fixture", "./__test__/auth/_setup.sql".into()),
                (3, "test", "./__test__/auth/test_login.sql".into()),
                (4, "teardown", "./__test__/auth/".into()),
                (5, "teardown", "./__test__/".into()),
            ]
        );
    }

    #[test]
    fn test_filter_matching_nothing_is_empty() {
        let (_tmp, scan) = project(&["__test__/_setup.sql", "__test__/test_a.sql"]);
        let plan = build_plan(&scan).filter(&Regex::new("nomatch").unwrap());
        assert!(plan.is_empty());
    }

    #[test]
    fn test_listing_format() {
        let (_tmp, scan) = project(&["__test__/_setup.sql", "__test__/test_a.sql"]);
        let listing = build_plan(&scan).listing();
        assert!(listing.contains("1. Setup:   ./__test__/_setup.sql"));
        assert!(listing.contains("2. Test:    ./__test__/test_a.sql"));
        assert!(listing.contains("3. Teardown: ./__test__/"));
        assert!(listing.contains("Total: 1 tests (with 1 setup, 1 teardown)"));
    }
}
