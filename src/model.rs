//! Uniform in-memory representation of LCOV coverage data. The parser
//! produces `Section`s; the aggregator turns them into `CoverageSummary`
//! values and, on demand, `DetailRecord`s.

use serde::Serialize;

/// Compute a coverage rate, returning 0.0 when the total is zero.
#[must_use]
pub fn rate(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        covered as f64 / total as f64
    }
}

/// A single instrumented line. `line_number` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDetail {
    pub line_number: u32,
    pub hit_count: u64,
}

/// A single branch arm as recorded by `BRDA`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchDetail {
    pub line_number: u32,
    pub block: String,
    /// Branch identifier. Repeated identifiers on one line are merged.
    pub branch: String,
    pub hit_count: u64,
}

/// A function declaration. The name may be empty or mangled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDetail {
    pub name: String,
    pub line_number: u32,
    pub hit_count: u64,
}

/// Instrumented/hit totals plus the per-record details they summarize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally<D> {
    pub instrumented: u64,
    pub hit: u64,
    pub details: Vec<D>,
}

impl<D> Default for Tally<D> {
    fn default() -> Self {
        Self {
            instrumented: 0,
            hit: 0,
            details: Vec::new(),
        }
    }
}

/// Coverage for a single source file, one per `SF:` ... `end_of_record`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub path: String,
    pub lines: Tally<LineDetail>,
    pub branches: Tally<BranchDetail>,
    pub functions: Tally<FunctionDetail>,
}

impl Section {
    pub fn new(path: String) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }
}

/// One instrumented/hit pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub instrumented: u64,
    pub hit: u64,
}

impl Counts {
    #[must_use]
    pub fn rate(&self) -> f64 {
        rate(self.hit, self.instrumented)
    }
}

/// Statement, branch and declaration totals for one source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoverageSummary {
    pub statements: Counts,
    pub branches: Counts,
    pub declarations: Counts,
}

/// One distinct branch identifier on a line, with summed hits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchRecord {
    pub label: String,
    pub executed: u64,
}

/// Per-line detail. Positions are 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetailRecord {
    Statement {
        line: u32,
        hits: u64,
        branches: Vec<BranchRecord>,
    },
    Declaration {
        name: String,
        hits: u64,
        line: u32,
    },
}
