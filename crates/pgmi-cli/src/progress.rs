use std::sync::Mutex;
use std::time::Duration;

use colored::*;
use console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use pgmi_core::db::Notice;
use pgmi_core::scanner::ScanStats;
use pgmi_core::testing::{TraceEvent, TraceKind};
use pgmi_core::ProgressReporter;

/// CLI progress reporter using indicatif spinners.
///
/// - Scan and connect phases: spinner
/// - Test run: one line per fixture and passed test, indented by depth
/// - Server notices are printed as they are drained
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
    interactive: bool,
    verbose: bool,
}

impl CliReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            interactive: Term::stderr().is_term(),
            verbose,
        }
    }

    fn spinner(&self, message: String) {
        let pb = if self.interactive {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
                pb.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
            }
            pb.enable_steady_tick(Duration::from_millis(80));
            pb
        } else {
            ProgressBar::hidden()
        };
        pb.set_message(message);
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    pub fn finish(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    /// Prints above the spinner, if one is active.
    fn line(&self, text: String) {
        match self.bar.lock().ok().as_ref().and_then(|g| g.as_ref()) {
            Some(pb) if self.interactive => pb.suspend(|| eprintln!("{}", text)),
            _ => eprintln!("{}", text),
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self) {
        self.spinner("Scanning project...".to_string());
    }

    fn on_scan_complete(&self, stats: &ScanStats, duration_secs: f64) {
        self.finish();
        eprintln!(
            "  {} Scan complete: {} deployment, {} setup, {} test, {} other files in {:.2}s",
            "✓".green(),
            stats.deployment,
            stats.setup,
            stats.test,
            stats.other,
            duration_secs
        );
    }

    fn on_connect_start(&self, host: &str, database: &str) {
        self.spinner(format!("Connecting to {} on {}...", database, host));
    }

    fn on_connect_complete(&self, database: &str) {
        self.finish();
        if self.verbose {
            eprintln!("  {} Connected to {}", "✓".green(), database);
        }
    }

    fn on_database_created(&self, database: &str) {
        eprintln!("  {} Created database {}", "✓".green(), database.bold());
    }

    fn on_database_recreated(&self, database: &str) {
        eprintln!("  {} Recreated database {}", "✓".green(), database.bold());
    }

    fn on_execute_start(&self) {
        self.spinner("Running deploy.sql...".to_string());
    }

    fn on_execute_complete(&self, duration_secs: f64) {
        self.finish();
        eprintln!(
            "  {} deploy.sql completed in {:.2}s",
            "✓".green(),
            duration_secs
        );
    }

    fn on_notice(&self, notice: &Notice) {
        let severity = match notice.severity.as_str() {
            "WARNING" => notice.severity.yellow(),
            "NOTICE" | "INFO" | "LOG" => notice.severity.cyan(),
            _ if !self.verbose => return,
            _ => notice.severity.dimmed(),
        };
        self.line(format!("  {}: {}", severity, notice.message));
    }

    fn on_trace(&self, event: &TraceEvent) {
        let indent = "  ".repeat(event.depth as usize + 1);
        let path = fit_path(event.path.as_deref().unwrap_or_default(), indent.len() + 4);
        match &event.kind {
            TraceKind::FixtureStart => self.line(format!("{}{} {}", indent, "↳".dimmed(), path.dimmed())),
            TraceKind::TestEnd => self.line(format!("{}{} {}", indent, "✓".green(), path)),
            TraceKind::TestStart | TraceKind::Rollback if self.verbose => {
                self.line(format!("{}{} {}", indent, event.kind.as_str().dimmed(), path.dimmed()))
            }
            TraceKind::Custom(name) => self.line(format!("{}{} {}", indent, name.dimmed(), path)),
            _ => {}
        }
    }
}

/// Shortens long paths to the terminal width, keeping both ends.
fn fit_path(path: &str, reserved: usize) -> String {
    let width = crossterm::terminal::size()
        .map(|(cols, _)| cols as usize)
        .unwrap_or(120);
    compress_path(path, width.saturating_sub(reserved).max(20))
}

fn compress_path(path: &str, max_length: usize) -> String {
    let chars: Vec<char> = path.chars().collect();
    if chars.len() <= max_length {
        return path.to_string();
    }
    let start_len = (max_length - 3) / 2;
    let end_len = max_length - start_len - 3;
    let mut compressed: String = chars[..start_len].iter().collect();
    compressed.push_str("...");
    compressed.extend(&chars[chars.len() - end_len..]);
    compressed
}
