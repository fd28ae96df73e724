//! Turns plan rows into the statements that run a test suite.
//!
//! Every directory with a fixture or tests gets a savepoint `__pgmi_dN__`
//! taken before its first step, and a test savepoint `__pgmi_tN__` taken
//! before its first test. Each test is rolled back to the test savepoint;
//! the teardown rolls back to and releases the directory savepoint.

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;

use super::plan::{PlanStep, StepType};
use crate::db::quote_literal;
use crate::error::Error;

pub const DEFAULT_CALLBACK: &str = "pg_temp.pgmi_trace_callback";

lazy_static! {
    static ref CALLBACK_NAME: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*)?$")
            .expect("callback name pattern is valid");
}

/// One statement of the suite. `script` names the test file it runs, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub script: Option<String>,
}

/// Accepts `name` or `schema.name`; the function itself is checked on the server.
pub fn validate_callback_name(name: &str) -> Result<(), Error> {
    if CALLBACK_NAME.is_match(name) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "invalid callback function name '{}': expected name or schema.name",
            name
        )))
    }
}

pub fn generate(steps: &[PlanStep], callback: &str) -> Vec<Statement> {
    let mut generator = Generator {
        callback,
        statements: Vec::new(),
        directory_ids: HashMap::new(),
        directory_savepoints: HashSet::new(),
        test_savepoints: HashSet::new(),
    };

    generator.event("suite_start", None, None, 0, 0);
    for step in steps {
        generator.step(step);
    }
    let last = steps.last().map_or(0, |s| s.ordinal);
    generator.event("suite_end", None, None, 0, last);
    generator.statements
}

struct Generator<'a> {
    callback: &'a str,
    statements: Vec<Statement>,
    directory_ids: HashMap<String, usize>,
    directory_savepoints: HashSet<String>,
    test_savepoints: HashSet<String>,
}

impl<'a> Generator<'a> {
    fn step(&mut self, step: &PlanStep) {
        let path = step.script_path.as_deref();
        match step.step_type {
            StepType::Fixture => {
                self.directory_savepoint(&step.directory);
                self.step_event("fixture_start", step);
                self.run_script(path);
                self.step_event("fixture_end", step);
            }
            StepType::Test => {
                self.directory_savepoint(&step.directory);
                let id = self.directory_id(&step.directory);
                if self.test_savepoints.insert(step.directory.clone()) {
                    self.plain(format!("SAVEPOINT __pgmi_t{}__;", id));
                }
                self.step_event("test_start", step);
                self.run_script(path);
                self.step_event("test_end", step);
                self.step_event("rollback", step);
                self.plain(format!("ROLLBACK TO SAVEPOINT __pgmi_t{}__;", id));
            }
            StepType::Teardown => {
                // Directories that only enclose selected tests never took a savepoint.
                if !self.directory_savepoints.remove(&step.directory) {
                    return;
                }
                self.test_savepoints.remove(&step.directory);
                let id = self.directory_id(&step.directory);
                self.step_event("teardown_start", step);
                self.plain(format!("ROLLBACK TO SAVEPOINT __pgmi_d{}__;", id));
                self.plain(format!("RELEASE SAVEPOINT __pgmi_d{}__;", id));
                self.step_event("teardown_end", step);
            }
        }
    }

    fn directory_id(&mut self, directory: &str) -> usize {
        let next = self.directory_ids.len() + 1;
        *self
            .directory_ids
            .entry(directory.to_string())
            .or_insert(next)
    }

    fn directory_savepoint(&mut self, directory: &str) {
        if self.directory_savepoints.insert(directory.to_string()) {
            let id = self.directory_id(directory);
            self.plain(format!("SAVEPOINT __pgmi_d{}__;", id));
        }
    }

    fn run_script(&mut self, path: Option<&str>) {
        let Some(path) = path else { return };
        self.statements.push(Statement {
            sql: format!(
                "DO $__pgmi__$ BEGIN EXECUTE (SELECT content FROM pg_temp._pgmi_test_source WHERE path = {}); END $__pgmi__$;",
                quote_literal(path)
            ),
            script: Some(path.to_string()),
        });
    }

    fn step_event(&mut self, event: &str, step: &PlanStep) {
        self.event(
            event,
            step.script_path.as_deref(),
            Some(&step.directory),
            step.depth,
            step.ordinal,
        );
    }

    fn event(
        &mut self,
        event: &str,
        path: Option<&str>,
        directory: Option<&str>,
        depth: u32,
        ordinal: u32,
    ) {
        let literal = |value: Option<&str>| value.map_or_else(|| "NULL".to_string(), quote_literal);
        self.plain(format!(
            "SELECT {}(ROW({}, {}, {}, {}, {}, NULL::jsonb)::pg_temp.pgmi_test_event);",
            self.callback,
            quote_literal(event),
            literal(path),
            literal(directory),
            depth,
            ordinal
        ));
    }

    fn plain(&mut self, sql: String) {
        self.statements.push(Statement { sql, script: None });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(ordinal: u32, step_type: StepType, path: Option<&str>, dir: &str) -> PlanStep {
        PlanStep {
            ordinal,
            step_type,
            script_path: path.map(str::to_string),
            directory: dir.to_string(),
            depth: 0,
        }
    }

    fn sql(statements: &[Statement]) -> Vec<String> {
        statements.iter().map(|s| s.sql.clone()).collect()
    }

    fn savepoint_lines(statements: &[Statement]) -> Vec<String> {
        sql(statements)
            .into_iter()
            .filter(|s| s.contains("SAVEPOINT"))
            .collect()
    }

    #[test]
    fn test_fixture_tests_and_teardown() {
        let steps = vec![
            step(1, StepType::Fixture, Some("./__test__/_setup.sql"), "./__test__/"),
            step(2, StepType::Test, Some("./__test__/test_a.sql"), "./__test__/"),
            step(3, StepType::Test, Some("./__test__/test_b.sql"), "./__test__/"),
            step(4, StepType::Teardown, None, "./__test__/"),
        ];
        let statements = generate(&steps, DEFAULT_CALLBACK);
        assert_eq!(
            savepoint_lines(&statements),
            vec![
                "SAVEPOINT __pgmi_d1__;",
                "SAVEPOINT __pgmi_t1__;",
                "ROLLBACK TO SAVEPOINT __pgmi_t1__;",
                "ROLLBACK TO SAVEPOINT __pgmi_t1__;",
                "ROLLBACK TO SAVEPOINT __pgmi_d1__;",
                "RELEASE SAVEPOINT __pgmi_d1__;",
            ]
        );

        let scripts: Vec<&str> = statements
            .iter()
            .filter_map(|s| s.script.as_deref())
            .collect();
        assert_eq!(
            scripts,
            vec![
                "./__test__/_setup.sql",
                "./__test__/test_a.sql",
                "./__test__/test_b.sql"
            ]
        );

        assert!(statements[0].sql.contains("'suite_start'"));
        assert!(statements.last().unwrap().sql.contains("'suite_end'"));
        assert!(statements.last().unwrap().sql.contains(", 0, 4, NULL::jsonb"));
    }

    #[test]
    fn test_event_order_for_one_test() {
        let steps = vec![step(1, StepType::Test, Some("./__test__/t.sql"), "./__test__/")];
        let events: Vec<String> = generate(&steps, DEFAULT_CALLBACK)
            .iter()
            .filter_map(|s| {
                s.sql
                    .strip_prefix("SELECT pg_temp.pgmi_trace_callback(ROW('")
                    .and_then(|rest| rest.split('\'').next())
                    .map(str::to_string)
            })
            .collect();
        assert_eq!(
            events,
            vec!["suite_start", "test_start", "test_end", "rollback", "suite_end"]
        );
    }

    #[test]
    fn test_script_statement_quotes_path() {
        let steps = vec![step(1, StepType::Test, Some("./__test__/it's.sql"), "./__test__/")];
        let statements = generate(&steps, DEFAULT_CALLBACK);
        let run = statements.iter().find(|s| s.script.is_some()).unwrap();
        assert_eq!(
            run.sql,
            "DO $__pgmi__$ BEGIN EXECUTE (SELECT content FROM pg_temp._pgmi_test_source \
             WHERE path = './__test__/it''s.sql'); END $__pgmi__$;"
        );
    }

    #[test]
    fn test_enclosing_teardown_without_savepoint_is_skipped() {
        let steps = vec![
            step(1, StepType::Test, Some("./__test__/a/t.sql"), "./__test__/a/"),
            step(2, StepType::Teardown, None, "./__test__/a/"),
            step(3, StepType::Teardown, None, "./__test__/"),
        ];
        let statements = generate(&steps, DEFAULT_CALLBACK);
        assert_eq!(
            savepoint_lines(&statements),
            vec![
                "SAVEPOINT __pgmi_d1__;",
                "SAVEPOINT __pgmi_t1__;",
                "ROLLBACK TO SAVEPOINT __pgmi_t1__;",
                "ROLLBACK TO SAVEPOINT __pgmi_d1__;",
                "RELEASE SAVEPOINT __pgmi_d1__;",
            ]
        );
        assert!(!sql(&statements).iter().any(|s| s.contains("'teardown_start'")
            && s.contains("'./__test__/', 0, 3")));
    }

    #[test]
    fn test_nested_directories_get_distinct_savepoints() {
        let steps = vec![
            step(1, StepType::Fixture, Some("./__test__/_setup.sql"), "./__test__/"),
            step(2, StepType::Fixture, Some("./__test__/a/_setup.sql"), "./__test__/a/"),
            step(3, StepType::Test, Some("./__test__/a/t.sql"), "./__test__/a/"),
            step(4, StepType::Teardown, None, "./__test__/a/"),
            step(5, StepType::Teardown, None, "./__test__/"),
        ];
        assert_eq!(
            savepoint_lines(&generate(&steps, DEFAULT_CALLBACK)),
            vec![
                "SAVEPOINT __pgmi_d1__;",
                "SAVEPOINT __pgmi_d2__;",
                "SAVEPOINT __pgmi_t2__;",
                "ROLLBACK TO SAVEPOINT __pgmi_t2__;",
                "ROLLBACK TO SAVEPOINT __pgmi_d2__;",
                "RELEASE SAVEPOINT __pgmi_d2__;",
                "ROLLBACK TO SAVEPOINT __pgmi_d1__;",
                "RELEASE SAVEPOINT __pgmi_d1__;",
            ]
        );
    }

    #[test]
    fn test_custom_callback_is_used() {
        let statements = generate(&[], "audit.on_test");
        assert_eq!(statements.len(), 2);
        assert!(statements[0].sql.starts_with("SELECT audit.on_test(ROW('suite_start'"));
    }

    #[test]
    fn test_validate_callback_name() {
        assert!(validate_callback_name("my_cb").is_ok());
        assert!(validate_callback_name("audit.on_test").is_ok());
        assert!(validate_callback_name("pg_temp.pgmi_trace_callback").is_ok());
        assert!(validate_callback_name("cb(); DROP TABLE x").is_err());
        assert!(validate_callback_name("a.b.c").is_err());
        assert!(validate_callback_name("").is_err());
    }
}
