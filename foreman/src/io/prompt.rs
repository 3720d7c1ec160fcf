//! Prompt build for the execution driver.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::criteria::acceptance_criteria;
use crate::core::types::WorkItem;

const WORKER_TEMPLATE: &str = include_str!("prompts/worker.md");

/// Inputs injected into the worker template.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub item: &'a WorkItem,
    /// Curated notes from the ledger's patterns section.
    pub patterns: &'a str,
    /// Whether this is the last remaining item in the pool.
    pub last_item: bool,
}

/// Template engine wrapper around minijinja.
pub struct PromptBuilder {
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("worker", WORKER_TEMPLATE)
            .expect("worker template should be valid");
        Self { env }
    }

    pub fn build(&self, inputs: &PromptInputs<'_>) -> Result<String> {
        let acceptance = acceptance_criteria(&inputs.item.body);
        let template = self.env.get_template("worker")?;
        let rendered = template.render(context! {
            display_id => inputs.item.display_id,
            title => inputs.item.title,
            body => inputs.item.body.trim(),
            acceptance => (!acceptance.is_empty()).then_some(acceptance),
            patterns => (!inputs.patterns.trim().is_empty()).then(|| inputs.patterns.trim()),
            last_item => inputs.last_item,
        })?;
        Ok(rendered)
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}
