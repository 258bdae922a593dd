//! Learning from accepted corrections: diff mining, rules, and review.

pub mod diff;
pub mod engine;
pub mod rules;

pub use diff::{CodeDiff, LineChange};
pub use engine::{Issue, LearnOutcome, LearningEngine};
pub use rules::{MergeOutcome, Rule, RuleCategory, RuleId, RuleStore};
