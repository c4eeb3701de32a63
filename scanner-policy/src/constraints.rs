//! Constraint recommendations attached to non-allow decisions.

use std::collections::BTreeSet;

use scanner_primitives::{CompositionSurplus, Severity};

/// Produces one recommendation per surplus, deduplicated by text.
///
/// High and Critical surpluses forbid co-authorizing the involved tools in one
/// agent session. Medium and Low surpluses ask for monitoring of the
/// combination. Output keeps the order of first appearance.
#[must_use]
pub fn recommend_constraints(surpluses: &[CompositionSurplus]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    surpluses
        .iter()
        .map(constraint_for)
        .filter(|text| seen.insert(text.clone()))
        .collect()
}

fn constraint_for(surplus: &CompositionSurplus) -> String {
    let tools = surplus
        .involved_tools()
        .map(|tool| format!("`{tool}`"))
        .collect::<Vec<_>>();
    let tools = match tools.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} and {last}", rest.join(", ")),
        _ => tools.concat(),
    };
    match surplus.severity() {
        Severity::Critical | Severity::High => {
            format!("{tools} must not be co-authorized in the same agent session")
        }
        Severity::Medium | Severity::Low => format!(
            "monitor sessions that invoke {tools} together for {}",
            surplus.capability_class()
        ),
    }
}
