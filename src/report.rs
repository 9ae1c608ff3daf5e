//! Test-result aggregation and reporting.
//!
//! The [`Reporter`] is the single store of per-snapshot outcomes for one run.
//! Cases are created as skipped placeholders when the app registers a
//! snapshot and overwritten in place (by name) when the app reports the
//! final result, so a run that crashes mid-way still lists every intended
//! test as at least skipped. The collection keeps registration order and
//! never shrinks within a run.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Outcome of a single snapshot test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    /// Snapshot name, unique per run
    pub name: String,

    /// Failure description; empty or absent means no failure
    pub failure: Option<String>,

    /// Whether the test never executed
    pub is_skipped: bool,

    /// Total execution time in milliseconds
    pub time_ms: u64,

    /// Render time in milliseconds, when the client measured it
    pub render_time_ms: Option<u64>,
}

impl TestCase {
    /// Placeholder for a registered but not yet executed snapshot
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure: None,
            is_skipped: true,
            time_ms: 0,
            render_time_ms: None,
        }
    }

    /// Whether this case carries a non-empty failure message
    pub fn has_failure(&self) -> bool {
        self.failure.as_deref().is_some_and(|f| !f.is_empty())
    }

    fn status(&self) -> &'static str {
        if self.has_failure() {
            "FAILED"
        } else if self.is_skipped {
            "SKIPPED"
        } else {
            "PASSED"
        }
    }
}

/// Aggregated counters derived from the current store contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub skipped: usize,
    pub failed: usize,

    /// Fastest render with the owning test name
    pub min_render: Option<(String, u64)>,

    /// Slowest render with the owning test name
    pub max_render: Option<(String, u64)>,

    /// Total execution time of non-skipped cases in milliseconds
    pub total_time_ms: u64,
}

/// Ordered store of test outcomes with log-table and JUnit rendering
#[derive(Debug)]
pub struct Reporter {
    run_name: String,
    class_name: String,
    tests: Vec<TestCase>,
}

impl Reporter {
    pub fn new(run_name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
            class_name: class_name.into(),
            tests: Vec::new(),
        }
    }

    /// Insert a skipped placeholder unless a case with this name exists
    pub fn register_test(&mut self, name: &str) {
        if !self.tests.iter().any(|t| t.name == name) {
            self.tests.push(TestCase::placeholder(name));
        }
    }

    /// Upsert a finished case by name. The last report for a name wins;
    /// an unknown name is appended, preserving registration order.
    pub fn report_test(&mut self, case: TestCase) {
        match self.tests.iter_mut().find(|t| t.name == case.name) {
            Some(existing) => *existing = case,
            None => self.tests.push(case),
        }
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    /// A run passes when no non-skipped case carries a non-empty failure.
    /// Skipped cases do not fail the run, even when they were registered
    /// and never reported.
    pub fn is_passed(&self) -> bool {
        !self.tests.iter().any(|t| !t.is_skipped && t.has_failure())
    }

    /// Compute the summary from current state; never cached
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total: self.tests.len(),
            passed: 0,
            skipped: 0,
            failed: 0,
            min_render: None,
            max_render: None,
            total_time_ms: 0,
        };

        for test in &self.tests {
            if test.is_skipped {
                summary.skipped += 1;
            } else if test.has_failure() {
                summary.failed += 1;
            } else {
                summary.passed += 1;
            }
            if !test.is_skipped {
                summary.total_time_ms += test.time_ms;
            }
            if let Some(render) = test.render_time_ms {
                if summary.min_render.as_ref().is_none_or(|(_, t)| render < *t) {
                    summary.min_render = Some((test.name.clone(), render));
                }
                if summary.max_render.as_ref().is_none_or(|(_, t)| render > *t) {
                    summary.max_render = Some((test.name.clone(), render));
                }
            }
        }

        summary
    }

    /// Print the human-readable report: per-test table, summary block and,
    /// when any test failed, the list of failed test names.
    pub fn to_log(&self) {
        println!();
        println!("==> All tests completed: <==");

        let name_width = self
            .tests
            .iter()
            .map(|t| t.name.len())
            .chain(["name".len()])
            .max()
            .unwrap_or(4);

        println!(
            "  {:<name_width$}  {:<8}  {:>8}  {:>12}  failure",
            "name", "status", "time", "render time"
        );
        for test in &self.tests {
            let render = test
                .render_time_ms
                .map(|t| format!("{:.3}s", time_to_sec(t)))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:<name_width$}  {:<8}  {:>7.3}s  {:>12}  {}",
                test.name,
                test.status(),
                time_to_sec(test.time_ms),
                render,
                test.failure.as_deref().filter(|f| !f.is_empty()).unwrap_or("-"),
            );
        }

        let summary = self.summary();
        println!();
        println!("==> Summary: <==");
        println!("  Total tests:     {}", summary.total);
        println!("  Passed tests:    {}", summary.passed);
        println!("  Skipped tests:   {}", summary.skipped);
        println!("  Failed tests:    {}", summary.failed);
        match &summary.min_render {
            Some((name, time)) => println!("  Min render time: {}ms ({})", time, name),
            None => println!("  Min render time: -"),
        }
        match &summary.max_render {
            Some((name, time)) => println!("  Max render time: {}ms ({})", time, name),
            None => println!("  Max render time: -"),
        }

        if summary.failed > 0 {
            println!();
            println!("==> Failed tests: <==");
            for test in self.tests.iter().filter(|t| !t.is_skipped && t.has_failure()) {
                println!("  - {}", test.name);
            }
        }
    }

    /// Write a JUnit-compatible XML file: one `<testsuite>` with one
    /// `<testcase>` per entry, always written even for partial runs.
    pub fn to_junit(&self, path: &Path) -> std::io::Result<()> {
        fs::write(path, self.junit_xml())
    }

    /// Render the JUnit XML document
    pub fn junit_xml(&self) -> String {
        let summary = self.summary();
        let suite_attrs = format!(
            "name=\"{}\" tests=\"{}\" skipped=\"{}\" errors=\"0\" failures=\"{}\" time=\"{:.3}\"",
            escape_xml(&self.run_name),
            summary.total,
            summary.skipped,
            summary.failed,
            time_to_sec(summary.total_time_ms),
        );

        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!("<testsuites {}>\n", suite_attrs));
        xml.push_str(&format!(
            "  <testsuite {} timestamp=\"{}\">\n",
            suite_attrs,
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S"),
        ));
        for test in &self.tests {
            xml.push_str(&format!(
                "    <testcase classname=\"{}\" name=\"{}\" time=\"{:.3}\">",
                escape_xml(&self.class_name),
                escape_xml(&test.name),
                time_to_sec(test.time_ms),
            ));
            if test.has_failure() {
                xml.push_str(&format!(
                    "\n      <failure>{}</failure>\n    ",
                    escape_xml(test.failure.as_deref().unwrap_or_default()),
                ));
            } else if test.is_skipped {
                xml.push_str("\n      <skipped/>\n    ");
            }
            xml.push_str("</testcase>\n");
        }
        xml.push_str("  </testsuite>\n</testsuites>\n");
        xml
    }
}

/// Convert milliseconds to seconds rounded to 3 decimal places
pub fn time_to_sec(ms: u64) -> f64 {
    (ms as f64 / 1000.0 * 1000.0).round() / 1000.0
}

/// Escape the XML special characters in attribute values and text nodes
fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn finished(name: &str, failure: Option<&str>, time_ms: u64) -> TestCase {
        TestCase {
            name: name.to_string(),
            failure: failure.map(String::from),
            is_skipped: false,
            time_ms,
            render_time_ms: None,
        }
    }

    #[test]
    fn registered_but_never_reported_stays_skipped() {
        let mut reporter = Reporter::new("run", "snapshots");
        reporter.register_test("T1");

        let summary = reporter.summary();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.passed, 0);
        assert_eq!(summary.failed, 0);
        // Skipped is not failed: the run still passes.
        assert!(reporter.is_passed());

        let xml = reporter.junit_xml();
        assert!(xml.contains("<skipped/>"));
        assert!(!xml.contains("<failure>"));
    }

    #[test]
    fn report_after_register_is_an_upsert() {
        let mut reporter = Reporter::new("run", "snapshots");
        reporter.register_test("A");
        reporter.report_test(finished("A", Some("x"), 10));

        assert_eq!(reporter.len(), 1);
        let case = &reporter.tests()[0];
        assert_eq!(case.failure.as_deref(), Some("x"));
        assert!(!case.is_skipped);
        assert_eq!(case.time_ms, 10);
    }

    #[test]
    fn register_is_idempotent() {
        let mut reporter = Reporter::new("run", "snapshots");
        reporter.register_test("A");
        reporter.register_test("A");
        assert_eq!(reporter.len(), 1);
    }

    #[test]
    fn last_report_wins_per_name() {
        let mut reporter = Reporter::new("run", "snapshots");
        reporter.report_test(finished("A", Some("first"), 1));
        reporter.report_test(finished("A", None, 2));

        assert_eq!(reporter.len(), 1);
        assert!(reporter.is_passed());
        assert_eq!(reporter.tests()[0].time_ms, 2);
    }

    #[test]
    fn is_passed_false_iff_a_non_skipped_case_failed() {
        let mut reporter = Reporter::new("run", "snapshots");
        reporter.report_test(finished("ok", None, 5));
        assert!(reporter.is_passed());

        // An empty failure string is not a failure.
        reporter.report_test(finished("empty", Some(""), 5));
        assert!(reporter.is_passed());

        reporter.report_test(finished("bad", Some("mismatch"), 5));
        assert!(!reporter.is_passed());
    }

    #[test]
    fn summary_tracks_render_extremes_and_total_time() {
        let mut reporter = Reporter::new("run", "snapshots");
        reporter.report_test(TestCase {
            name: "fast".to_string(),
            failure: None,
            is_skipped: false,
            time_ms: 100,
            render_time_ms: Some(12),
        });
        reporter.report_test(TestCase {
            name: "slow".to_string(),
            failure: None,
            is_skipped: false,
            time_ms: 300,
            render_time_ms: Some(200),
        });
        reporter.register_test("never_ran");

        let summary = reporter.summary();
        assert_eq!(summary.min_render, Some(("fast".to_string(), 12)));
        assert_eq!(summary.max_render, Some(("slow".to_string(), 200)));
        assert_eq!(summary.total_time_ms, 400);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn junit_structure_matches_store() {
        let mut reporter = Reporter::new("ui run", "snapshots");
        reporter.report_test(finished("passes", None, 1500));
        reporter.report_test(finished("fails", Some("5 pixels differ"), 250));
        reporter.register_test("skipped_one");

        let xml = reporter.junit_xml();

        assert_eq!(xml.matches("<testcase").count(), 3);
        assert_eq!(xml.matches("<failure>").count(), 1);
        assert_eq!(xml.matches("<skipped/>").count(), 1);
        assert!(xml.contains("tests=\"3\""));
        assert!(xml.contains("failures=\"1\""));
        assert!(xml.contains("skipped=\"1\""));
        assert!(xml.contains("time=\"1.500\""));
        assert!(xml.contains("time=\"0.250\""));
        // Total time counts non-skipped cases only.
        assert!(xml.contains("time=\"1.750\""));
    }

    #[test]
    fn junit_escapes_special_characters() {
        let mut reporter = Reporter::new("run", "snapshots");
        reporter.report_test(finished("a<b&\"c\"", Some("diff > 0 pixels"), 1));

        let xml = reporter.junit_xml();
        assert!(xml.contains("name=\"a&lt;b&amp;&quot;c&quot;\""));
        assert!(xml.contains("<failure>diff &gt; 0 pixels</failure>"));
        assert!(!xml.contains("a<b"));
    }

    #[test]
    fn junit_writes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junit.xml");
        let mut reporter = Reporter::new("run", "snapshots");
        reporter.report_test(finished("only", None, 10));

        reporter.to_junit(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("<?xml version=\"1.0\""));
        assert!(content.contains("name=\"only\""));
    }

    #[test]
    fn time_to_sec_rounds_to_three_decimals() {
        assert_eq!(time_to_sec(1234), 1.234);
        assert_eq!(time_to_sec(0), 0.0);
        assert_eq!(time_to_sec(999), 0.999);
    }
}
