//! Run summaries.
//!
//! [`Engine::execute`](crate::engine::Engine::execute) returns a
//! [`RunReport`] describing what happened in one run: which pipelines ran,
//! which reused a stored result, how many documents each produced, and what
//! the cache sweep evicted.
//!
//! # Output Format
//!
//! ```text
//! 001 Assets: 12 documents (reused)
//! 002 Posts: 8 documents in 41ms
//! 003 Feed: 1 document in 2ms
//!
//! Ran 2 pipelines, reused 1, 21 documents in 44ms
//! Cache: 9 hits, 3 misses (12 lookups, 20 entries), 2 evicted
//! ```
//!
//! [`format_run_report`] is pure and returns lines so callers can print,
//! log, or assert on them. `Display` joins the same lines.

use crate::cache::CacheStats;
use std::fmt;
use std::time::Duration;

/// How a pipeline's stored result was obtained in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The modules ran.
    Executed,
    /// A process-once pipeline kept the result of an earlier run.
    Reused,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub name: String,
    pub outcome: PipelineOutcome,
    /// Number of documents in the stored result.
    pub documents: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Pipelines in execution order. Failed pipelines are not listed.
    pub pipelines: Vec<PipelineReport>,
    /// Cache activity over the run, taken before the sweep.
    pub cache: CacheStats,
    /// Entries dropped by the end-of-run sweep.
    pub evicted: usize,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn executed(&self) -> usize {
        self.count(PipelineOutcome::Executed)
    }

    pub fn reused(&self) -> usize {
        self.count(PipelineOutcome::Reused)
    }

    pub fn total_documents(&self) -> usize {
        self.pipelines.iter().map(|p| p.documents).sum()
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineReport> {
        let folded = name.to_lowercase();
        self.pipelines
            .iter()
            .find(|p| p.name.to_lowercase() == folded)
    }

    fn count(&self, outcome: PipelineOutcome) -> usize {
        self.pipelines.iter().filter(|p| p.outcome == outcome).count()
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

fn millis(d: Duration) -> String {
    format!("{}ms", d.as_millis())
}

/// Format a run report as display lines.
pub fn format_run_report(report: &RunReport) -> Vec<String> {
    let mut lines = Vec::new();

    for (i, p) in report.pipelines.iter().enumerate() {
        let docs = plural(p.documents, "document");
        let detail = match p.outcome {
            PipelineOutcome::Executed => format!("in {}", millis(p.elapsed)),
            PipelineOutcome::Reused => "(reused)".to_string(),
        };
        lines.push(format!("{:0>3} {}: {} {}", i + 1, p.name, docs, detail));
    }

    if !report.pipelines.is_empty() {
        lines.push(String::new());
    }

    let mut summary = format!("Ran {}", plural(report.executed(), "pipeline"));
    if report.reused() > 0 {
        summary.push_str(&format!(", reused {}", report.reused()));
    }
    summary.push_str(&format!(
        ", {} in {}",
        plural(report.total_documents(), "document"),
        millis(report.elapsed)
    ));
    lines.push(summary);
    lines.push(format!("Cache: {}, {} evicted", report.cache, report.evicted));
    lines
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_run_report(self).join("\n"))
    }
}
