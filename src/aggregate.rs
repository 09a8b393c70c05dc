//! Turning parsed sections into summaries and per-line detail records.

use std::collections::HashMap;

use tracing::warn;

use crate::demangle::{is_mangled, Demangler};
use crate::model::{BranchRecord, Counts, CoverageSummary, DetailRecord, Section};

/// Project the recorded totals of a section. Details are not consulted.
#[must_use]
pub fn summarize(section: &Section) -> CoverageSummary {
    CoverageSummary {
        statements: Counts {
            instrumented: section.lines.instrumented,
            hit: section.lines.hit,
        },
        branches: Counts {
            instrumented: section.branches.instrumented,
            hit: section.branches.hit,
        },
        declarations: Counts {
            instrumented: section.functions.instrumented,
            hit: section.functions.hit,
        },
    }
}

/// Whether expanding `section` will call into a demangler.
pub fn needs_demangler(section: &Section) -> bool {
    section
        .functions
        .details
        .iter()
        .any(|f| is_mangled(&f.name))
}

/// Group branch details by line, one record per distinct branch identifier
/// in first-seen order. Repeated identifiers have their hits summed.
pub fn branch_groups(section: &Section) -> HashMap<u32, Vec<BranchRecord>> {
    let mut groups: HashMap<u32, Vec<BranchRecord>> = HashMap::new();
    for detail in &section.branches.details {
        let group = groups.entry(detail.line_number).or_default();
        let idx = match group.iter().position(|b| b.label == detail.branch) {
            Some(idx) => idx,
            None => {
                group.push(BranchRecord {
                    label: detail.branch.clone(),
                    executed: 0,
                });
                group.len() - 1
            }
        };
        group[idx].executed = group[idx].executed.saturating_add(detail.hit_count);
    }
    groups
}

/// Expand a section into statement records followed by declaration records,
/// each kind in the section's own order. Positions are re-based to 0.
///
/// Names that fail to demangle keep their mangled form; the other records
/// are unaffected. Without a demangler every name is used verbatim.
pub fn expand_details(section: &Section, demangler: Option<&dyn Demangler>) -> Vec<DetailRecord> {
    let groups = branch_groups(section);
    let mut records = Vec::with_capacity(
        section.lines.details.len() + section.functions.details.len(),
    );

    for line in &section.lines.details {
        records.push(DetailRecord::Statement {
            line: line.line_number.saturating_sub(1),
            hits: line.hit_count,
            branches: groups.get(&line.line_number).cloned().unwrap_or_default(),
        });
    }

    for function in &section.functions.details {
        if function.name.is_empty() {
            continue;
        }
        records.push(DetailRecord::Declaration {
            name: display_name(&function.name, demangler),
            hits: function.hit_count,
            line: function.line_number.saturating_sub(1),
        });
    }

    records
}

fn display_name(name: &str, demangler: Option<&dyn Demangler>) -> String {
    let Some(demangler) = demangler.filter(|_| is_mangled(name)) else {
        return name.to_string();
    };
    match demangler.demangle(name) {
        Ok(display) => display,
        Err(e) => {
            warn!(symbol = name, error = %e, "keeping mangled name");
            name.to_string()
        }
    }
}
