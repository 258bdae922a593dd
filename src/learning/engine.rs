//! Rule induction from accepted corrections.
//!
//! The learning engine mines line-level changes for a fixed catalogue of
//! edit shapes (declaration hardening, unsafe API removal, loop
//! substitution, error-handling additions, strict equality) and promotes
//! matches into persistent rules. A second operation replays every stored
//! rule against new text as advisory review issues.
//!
//! Learned patterns are untrusted input: every candidate is compiled under
//! a size limit before promotion, and review skips any stored pattern that
//! no longer compiles instead of aborting.

use std::sync::Arc;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::learning::diff::{CodeDiff, LineChange};
use crate::learning::rules::{MergeOutcome, Rule, RuleCategory, RuleId, RuleStore};
use crate::{mlog_debug, mlog_warn};

/// Matches `var <name>` declarations to lift the variable name.
static VAR_DECL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bvar\s+([A-Za-z_$][A-Za-z0-9_$]*)").unwrap());

/// Unsafe DOM-style APIs whose removal is worth remembering.
const UNSAFE_APIS: &[(&str, &str, &str)] = &[
    (
        "innerHTML",
        r"\binnerHTML\b",
        "Avoid innerHTML; use textContent or a sanitizer",
    ),
    (
        "eval(",
        r"\beval\s*\(",
        "Avoid eval; it executes arbitrary strings",
    ),
    (
        "document.write",
        r"\bdocument\.write\s*\(",
        "Avoid document.write; manipulate the DOM directly",
    ),
];

/// Outcome of a learn call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnOutcome {
    /// Number of genuinely new rules created (reinforcements not counted).
    pub rules_generated: usize,
}

/// An advisory issue raised during review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// The rule that matched.
    pub rule_id: RuleId,
    pub category: RuleCategory,
    /// The rule's suggestion.
    pub suggestion: String,
    /// 1-based line number of the match.
    pub line: usize,
    /// The matching line of text.
    pub matched: String,
    /// Confidence of the rule at match time.
    pub confidence: f64,
}

/// Mines accepted corrections into rules and applies them during review.
pub struct LearningEngine {
    rules: Arc<RuleStore>,
    pattern_size_limit: usize,
}

impl LearningEngine {
    /// Create an engine over a rule store.
    ///
    /// `pattern_size_limit` caps the compiled size of learned patterns so a
    /// pathological pattern cannot explode matching time or memory.
    pub fn new(rules: Arc<RuleStore>, pattern_size_limit: usize) -> Self {
        Self {
            rules,
            pattern_size_limit,
        }
    }

    /// Access the underlying rule store.
    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    /// Add a hand-written rule, validating its pattern first.
    pub async fn add_rule(
        &self,
        pattern: &str,
        suggestion: &str,
        category: RuleCategory,
    ) -> Result<RuleId> {
        if self.compile(pattern).is_none() {
            return Err(crate::Error::InvalidRulePattern(pattern.to_string()));
        }
        match self
            .rules
            .merge_candidate(Rule::new(pattern, suggestion, category))
            .await?
        {
            MergeOutcome::Created(id) | MergeOutcome::Reinforced(id) => Ok(id),
        }
    }

    /// Mine a diff for reusable rules and merge them into the store.
    pub async fn learn(&self, diff: &CodeDiff) -> Result<LearnOutcome> {
        let mut generated = 0;

        for change in &diff.changes {
            for candidate in extract_candidates(change) {
                // Untrusted pattern: must compile under the size cap before
                // it is allowed into the store.
                if self.compile(&candidate.pattern).is_none() {
                    mlog_warn!(
                        "learn: rejected uncompilable pattern from {}: {}",
                        diff.file,
                        candidate.pattern
                    );
                    continue;
                }

                match self.rules.merge_candidate(candidate).await? {
                    MergeOutcome::Created(id) => {
                        mlog_debug!("learn: new rule {} from {}", id.short(), diff.file);
                        generated += 1;
                    }
                    MergeOutcome::Reinforced(id) => {
                        mlog_debug!("learn: reinforced rule {}", id.short());
                    }
                }
            }
        }

        Ok(LearnOutcome {
            rules_generated: generated,
        })
    }

    /// Flag advisory issues in `text` using every stored rule.
    ///
    /// Rules whose patterns fail to compile are skipped with a warning;
    /// they never abort the review of the remaining rules. Matching
    /// increments the rule's usage and refreshes `last_used`.
    pub async fn review(&self, text: &str) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();

        for rule in self.rules.all().await {
            let Some(re) = self.compile(&rule.pattern) else {
                mlog_warn!(
                    "review: skipping rule {} with invalid pattern: {}",
                    rule.id.short(),
                    rule.pattern
                );
                continue;
            };

            for (idx, line) in text.lines().enumerate() {
                if re.is_match(line) {
                    issues.push(Issue {
                        rule_id: rule.id,
                        category: rule.category,
                        suggestion: rule.suggestion.clone(),
                        line: idx + 1,
                        matched: line.to_string(),
                        confidence: rule.confidence,
                    });
                    self.rules.record_match(&rule.id).await?;
                }
            }
        }

        Ok(issues)
    }

    fn compile(&self, pattern: &str) -> Option<Regex> {
        RegexBuilder::new(pattern)
            .size_limit(self.pattern_size_limit)
            .build()
            .ok()
    }
}

/// The fixed extractor catalogue: each recognized edit shape yields a
/// candidate rule with initial confidence and usage count 1.
fn extract_candidates(change: &LineChange) -> Vec<Rule> {
    let mut candidates = Vec::new();

    match change {
        LineChange::Replaced { before, after, .. } => {
            if let Some(rule) = var_declaration_rule(before, after) {
                candidates.push(rule);
            }
            if let Some(rule) = loop_substitution_rule(before, after) {
                candidates.push(rule);
            }
            if let Some(rule) = strict_equality_rule(before, after) {
                candidates.push(rule);
            }
            if let Some(rule) = error_handling_rule(before, after) {
                candidates.push(rule);
            }
            if let Some(rule) = unsafe_api_rule(before, after) {
                candidates.push(rule);
            }
        }
        LineChange::Removed { content, .. } => {
            if let Some(rule) = unsafe_api_rule(content, "") {
                candidates.push(rule);
            }
        }
        LineChange::Added { .. } => {}
    }

    candidates
}

/// `var x = ...` replaced by `const x` / `let x`.
fn var_declaration_rule(before: &str, after: &str) -> Option<Rule> {
    let trimmed_after = after.trim_start();
    if !trimmed_after.starts_with("const ") && !trimmed_after.starts_with("let ") {
        return None;
    }
    let captures = VAR_DECL_RE.captures(before)?;
    let name = captures.get(1)?.as_str();
    Some(Rule::new(
        &format!(r"\bvar\s+{}\b", regex::escape(name)),
        &format!("Declare `{}` with const or let instead of var", name),
        RuleCategory::Style,
    ))
}

/// Index loop replaced by an iterator method.
fn loop_substitution_rule(before: &str, after: &str) -> Option<Rule> {
    let had_loop = before.contains("for (") || before.contains("for(");
    let has_iterator =
        after.contains(".forEach(") || after.contains(".map(") || after.contains(".filter(");
    if had_loop && has_iterator {
        Some(Rule::new(
            r"\bfor\s*\(",
            "Prefer iterator methods (forEach/map/filter) over index loops",
            RuleCategory::Style,
        ))
    } else {
        None
    }
}

/// Loose equality hardened to strict equality.
fn strict_equality_rule(before: &str, after: &str) -> Option<Rule> {
    if before.contains("==") && !before.contains("===") && after.contains("===") {
        Some(Rule::new(
            r"[^=!<>]==[^=]",
            "Use strict equality (===) instead of loose equality (==)",
            RuleCategory::BestPractice,
        ))
    } else {
        None
    }
}

/// A bare statement wrapped in error handling.
fn error_handling_rule(before: &str, after: &str) -> Option<Rule> {
    let added_handling = (after.contains("try") && !before.contains("try"))
        || (after.contains(".catch(") && !before.contains(".catch("));
    let trimmed = before.trim();
    if added_handling && !trimmed.is_empty() {
        Some(Rule::new(
            &regex::escape(trimmed),
            "This call was previously wrapped in error handling; consider try/catch",
            RuleCategory::BestPractice,
        ))
    } else {
        None
    }
}

/// An unsafe API removed or replaced.
fn unsafe_api_rule(before: &str, after: &str) -> Option<Rule> {
    for (needle, pattern, suggestion) in UNSAFE_APIS {
        if before.contains(needle) && !after.contains(needle) {
            return Some(Rule::new(pattern, suggestion, RuleCategory::Security));
        }
    }
    None
}
