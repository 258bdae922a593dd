//! Rule mining, review, and persistence.

use std::sync::Arc;

use maestro::knowledge::{FileKnowledge, InMemoryKnowledge};
use maestro::learning::engine::LearningEngine;
use maestro::learning::rules::{RuleCategory, RuleStore};
use maestro::CodeDiff;

use crate::fixtures::var_to_const_diff;

fn engine_over(store: Arc<RuleStore>) -> LearningEngine {
    LearningEngine::new(store, 1 << 16)
}

#[tokio::test]
async fn test_learned_rule_flags_future_occurrences() {
    let store = Arc::new(RuleStore::new(Arc::new(InMemoryKnowledge::new())));
    let engine = engine_over(store.clone());

    let outcome = engine.learn(&var_to_const_diff()).await.unwrap();
    assert_eq!(outcome.rules_generated, 1);

    // The learned pattern is specific to the renamed variable.
    let issues = engine
        .review("function f() {\n  var total = 0;\n  return total;\n}\n")
        .await
        .unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].line, 2);
    assert_eq!(issues[0].category, RuleCategory::Style);

    // Matching feeds back into the rule's usage count.
    let rule = store.get(&issues[0].rule_id).await.unwrap();
    assert_eq!(rule.usage_count, 2);
}

#[tokio::test]
async fn test_repeated_diff_reinforces_instead_of_duplicating() {
    let store = Arc::new(RuleStore::new(Arc::new(InMemoryKnowledge::new())));
    let engine = engine_over(store.clone());

    let first = engine.learn(&var_to_const_diff()).await.unwrap();
    assert_eq!(first.rules_generated, 1);

    let second = engine.learn(&var_to_const_diff()).await.unwrap();
    assert_eq!(second.rules_generated, 0);

    let rules = store.all().await;
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].usage_count, 2);
    assert!(rules[0].confidence > 0.7);
}

#[tokio::test]
async fn test_security_rule_from_removed_unsafe_api() {
    let store = Arc::new(RuleStore::new(Arc::new(InMemoryKnowledge::new())));
    let engine = engine_over(store);

    let diff = CodeDiff::new(
        "src/render.js",
        "el.innerHTML = user_input;\n",
        "el.textContent = user_input;\n",
        "senior-reviewer",
    );
    engine.learn(&diff).await.unwrap();

    let issues = engine
        .review("node.innerHTML = data;\n")
        .await
        .unwrap();
    assert!(issues
        .iter()
        .any(|i| i.category == RuleCategory::Security));
}

#[tokio::test]
async fn test_rules_survive_store_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.json");

    {
        let knowledge = Arc::new(FileKnowledge::open(&path).await.unwrap());
        let store = Arc::new(RuleStore::new(knowledge));
        let engine = engine_over(store);
        engine.learn(&var_to_const_diff()).await.unwrap();
    }

    let knowledge = Arc::new(FileKnowledge::open(&path).await.unwrap());
    let store = Arc::new(RuleStore::new(knowledge));
    assert_eq!(store.load().await.unwrap(), 1);

    // The reopened rule set still reviews.
    let engine = engine_over(store);
    let issues = engine.review("var total = 1;\n").await.unwrap();
    assert_eq!(issues.len(), 1);
}
