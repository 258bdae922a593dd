//! Workflow templates: named step sequences with declared dependencies.
//!
//! Templates are immutable once registered. Registration validates the
//! step-dependency graph with petgraph so a cyclic template can never
//! reach the engine.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};

use crate::core::router::WorkerRole;
use crate::error::{Error, Result};
use crate::mlog_debug;

/// What to do with a step that exhausts its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Fail the whole run.
    Abort,
    /// Mark the step (and its dependents) skipped and continue.
    Skip,
}

/// Retry policy applied to failing steps of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub on_exhausted: ExhaustionPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            on_exhausted: ExhaustionPolicy::Abort,
        }
    }
}

/// One step of a workflow, bound to a worker role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step name, unique within the template.
    pub name: String,
    /// Worker role the step is dispatched to.
    pub role: WorkerRole,
    /// Free-form step configuration passed through to the worker.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Names of same-workflow steps that must be done first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl WorkflowStep {
    pub fn new(name: &str, role: WorkerRole) -> Self {
        Self {
            name: name.to_string(),
            role,
            config: serde_json::Value::Object(Default::default()),
            depends_on: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// A named, ordered, immutable list of workflow steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    /// Retry policy override; templates without one use the engine default.
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

impl WorkflowTemplate {
    pub fn new(name: &str, steps: Vec<WorkflowStep>) -> Self {
        Self {
            name: name.to_string(),
            steps,
            retry: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Validate the template: unique step names, known dependencies, and an
    /// acyclic dependency graph.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::Validation(format!(
                "Template {} has no steps",
                self.name
            )));
        }

        let mut graph = DiGraph::<&str, ()>::new();
        let mut indices = HashMap::new();
        for step in &self.steps {
            if indices.contains_key(step.name.as_str()) {
                return Err(Error::Validation(format!(
                    "Template {} has duplicate step name {}",
                    self.name, step.name
                )));
            }
            let idx = graph.add_node(step.name.as_str());
            indices.insert(step.name.as_str(), idx);
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                let Some(&dep_idx) = indices.get(dep.as_str()) else {
                    return Err(Error::UnknownStepDependency {
                        template: self.name.clone(),
                        step: step.name.clone(),
                        dependency: dep.clone(),
                    });
                };
                graph.add_edge(dep_idx, indices[step.name.as_str()], ());
            }
        }

        if is_cyclic_directed(&graph) {
            return Err(Error::TemplateCycle {
                template: self.name.clone(),
                detail: "step dependencies form a cycle".to_string(),
            });
        }

        Ok(())
    }
}

/// Registry of immutable workflow templates, populated at startup.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Arc<WorkflowTemplate>>,
}

impl TemplateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry preloaded with the standard templates the router
    /// refers to.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        let standard = [
            WorkflowTemplate::new(
                "direct-implementation",
                vec![
                    WorkflowStep::new("implement", WorkerRole::Implementer),
                    WorkflowStep::new("execute", WorkerRole::Executor).depends_on(&["implement"]),
                ],
            ),
            WorkflowTemplate::new(
                "design-implement",
                vec![
                    WorkflowStep::new("design", WorkerRole::Designer),
                    WorkflowStep::new("implement", WorkerRole::Implementer).depends_on(&["design"]),
                ],
            ),
            WorkflowTemplate::new(
                "full-design",
                vec![
                    WorkflowStep::new("design", WorkerRole::Designer),
                    WorkflowStep::new("plan", WorkerRole::Planner).depends_on(&["design"]),
                    WorkflowStep::new("ui-review", WorkerRole::UiSpecialist)
                        .depends_on(&["design"]),
                ],
            ),
            WorkflowTemplate::new(
                "design-consensus",
                vec![
                    WorkflowStep::new("design", WorkerRole::Designer),
                    WorkflowStep::new("plan", WorkerRole::Planner).depends_on(&["design"]),
                    WorkflowStep::new("ui-review", WorkerRole::UiSpecialist)
                        .depends_on(&["design"]),
                ],
            ),
            WorkflowTemplate::new(
                "review-only",
                vec![WorkflowStep::new("review", WorkerRole::Reviewer)],
            ),
            WorkflowTemplate::new(
                "execute-only",
                vec![WorkflowStep::new("execute", WorkerRole::Executor)],
            ),
        ];
        for template in standard {
            registry
                .register(template)
                .expect("standard templates are valid");
        }
        registry
    }

    /// Register a template after validating it.
    pub fn register(&mut self, template: WorkflowTemplate) -> Result<()> {
        template.validate()?;
        if self.templates.contains_key(&template.name) {
            return Err(Error::TemplateExists(template.name));
        }
        mlog_debug!(
            "TemplateRegistry: registered {} ({} steps)",
            template.name,
            template.steps.len()
        );
        self.templates
            .insert(template.name.clone(), Arc::new(template));
        Ok(())
    }

    /// Look up a template by name.
    pub fn get(&self, name: &str) -> Result<Arc<WorkflowTemplate>> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TemplateNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
