//! Auto-assignment of discovered hosts to departments and equipment units

mod engine;
mod rules;

pub use engine::{
    ASSIGNMENT_LEASE, AssignmentFailure, AssignmentReport, AssignmentStats, AssignmentSummary,
    AutoAssignmentEngine,
};
pub use rules::{
    CompiledRule, MatchSubject, RuleField, RuleSpec, RuleTable, load_rule_specs, parse_rule_specs,
};
