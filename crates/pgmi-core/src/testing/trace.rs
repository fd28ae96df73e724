//! Parsing of `[TRACE]event|path|directory|depth|ordinal` notices.

use std::fmt;

pub const TRACE_PREFIX: &str = "[TRACE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceKind {
    SuiteStart,
    SuiteEnd,
    FixtureStart,
    FixtureEnd,
    TestStart,
    TestEnd,
    Rollback,
    TeardownStart,
    TeardownEnd,
    /// Raised by a custom callback.
    Custom(String),
}

impl TraceKind {
    pub fn as_str(&self) -> &str {
        match self {
            TraceKind::SuiteStart => "suite_start",
            TraceKind::SuiteEnd => "suite_end",
            TraceKind::FixtureStart => "fixture_start",
            TraceKind::FixtureEnd => "fixture_end",
            TraceKind::TestStart => "test_start",
            TraceKind::TestEnd => "test_end",
            TraceKind::Rollback => "rollback",
            TraceKind::TeardownStart => "teardown_start",
            TraceKind::TeardownEnd => "teardown_end",
            TraceKind::Custom(name) => name,
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "suite_start" => TraceKind::SuiteStart,
            "suite_end" => TraceKind::SuiteEnd,
            "fixture_start" => TraceKind::FixtureStart,
            "fixture_end" => TraceKind::FixtureEnd,
            "test_start" => TraceKind::TestStart,
            "test_end" => TraceKind::TestEnd,
            "rollback" => TraceKind::Rollback,
            "teardown_start" => TraceKind::TeardownStart,
            "teardown_end" => TraceKind::TeardownEnd,
            other => TraceKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub kind: TraceKind,
    pub path: Option<String>,
    pub directory: Option<String>,
    pub depth: u32,
    pub ordinal: u32,
}

impl TraceEvent {
    /// `None` for notices that are not trace lines.
    pub fn parse(message: &str) -> Option<Self> {
        let body = message.trim().strip_prefix(TRACE_PREFIX)?;
        let mut fields = body.splitn(5, '|');
        let kind = fields.next().filter(|s| !s.is_empty())?;
        let path = fields.next()?;
        let directory = fields.next()?;
        let depth = fields.next()?.trim().parse().ok()?;
        let ordinal = fields.next()?.trim().parse().ok()?;
        Some(TraceEvent {
            kind: TraceKind::parse(kind),
            path: non_empty(path),
            directory: non_empty(directory),
            depth,
            ordinal,
        })
    }

    /// A test passed once its end event arrives.
    pub fn is_pass(&self) -> bool {
        self.kind == TraceKind::TestEnd
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty() && value != "<NULL>").then(|| value.to_string())
}
