//! Seeding: create backend items from a generated plan, in dependency order.
//!
//! The plan is an LLM-produced JSON array (the generation itself happens
//! elsewhere); records reference their prerequisites by array index. Items
//! are created strictly in dependency order so each record's `## Blocked by`
//! section can hold the real display ids of already-created blockers.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::backend::Backend;
use crate::core::types::{LOWEST_URGENCY, LedgerEvent, NewWorkItem, WorkItem};
use crate::io::ledger::{Ledger, LedgerEntry};

const PLAN_SCHEMA: &str = include_str!("../schemas/seed_plan.schema.json");

/// One planned item.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedRecord {
    pub title: String,
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub depends_on_index: Vec<usize>,
}

fn default_priority() -> u8 {
    LOWEST_URGENCY
}

/// Read and schema-validate a plan file.
pub fn load_plan(path: &Path) -> Result<Vec<SeedRecord>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse plan {}", path.display()))?;
    validate_schema(&value)?;
    let records: Vec<SeedRecord> =
        serde_json::from_value(value).with_context(|| format!("parse plan {}", path.display()))?;
    Ok(records)
}

/// Validate a plan document against the bundled schema (Draft 2020-12).
fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(PLAN_SCHEMA).context("parse seed plan schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile seed plan schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("seed plan validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

/// Topological creation order over `depends_on_index` (Kahn, lowest index
/// first for determinism). A dependency cycle or bad index is fatal.
pub fn creation_order(records: &[SeedRecord]) -> Result<Vec<usize>> {
    let deps: Vec<BTreeSet<usize>> = records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let unique: BTreeSet<usize> = record.depends_on_index.iter().copied().collect();
            for &dep in &unique {
                if dep >= records.len() {
                    bail!("record {i} depends on out-of-range index {dep}");
                }
                if dep == i {
                    bail!("record {i} depends on itself");
                }
            }
            Ok(unique)
        })
        .collect::<Result<_>>()?;

    let mut indegree: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(records.len());
    while let Some(&next) = ready.iter().next() {
        ready.remove(&next);
        order.push(next);
        for (i, dep_set) in deps.iter().enumerate() {
            if dep_set.contains(&next) {
                indegree[i] -= 1;
                if indegree[i] == 0 {
                    ready.insert(i);
                }
            }
        }
    }

    if order.len() != records.len() {
        bail!("seed plan has a dependency cycle");
    }
    Ok(order)
}

/// Create every planned item, resolving index references to the display ids
/// of the already-created blockers.
pub fn run_seed(
    backend: &dyn Backend,
    ledger: &Ledger,
    label: &str,
    records: &[SeedRecord],
) -> Result<Vec<WorkItem>> {
    let order = creation_order(records)?;
    let mut created: Vec<Option<WorkItem>> = vec![None; records.len()];
    let mut out = Vec::with_capacity(records.len());

    for idx in order {
        let record = &records[idx];
        let deps: BTreeSet<usize> = record.depends_on_index.iter().copied().collect();

        let mut body = record.description.trim_end().to_string();
        if !deps.is_empty() {
            body.push_str("\n\n## Blocked by\n");
            for dep in &deps {
                let blocker = created[*dep]
                    .as_ref()
                    .expect("creation order places blockers first");
                body.push_str(&format!("- {}\n", blocker.display_id));
            }
        }

        let draft = NewWorkItem {
            title: record.title.clone(),
            body,
            priority_score: record.priority.min(LOWEST_URGENCY),
            labels: record.labels.clone(),
        };
        let item = backend
            .create(&draft, label)
            .with_context(|| format!("create planned item {idx} ({})", record.title))?;
        info!(item = %item.display_id, title = %item.title, "seeded");
        ledger.append(&LedgerEntry::now(
            LedgerEvent::Seeded,
            &item.display_id,
            record.title.clone(),
        ))?;

        created[idx] = Some(item.clone());
        out.push(item);
    }

    Ok(out)
}
