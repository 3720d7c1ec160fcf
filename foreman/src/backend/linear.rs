//! Linear adapter over the GraphQL API.
//!
//! Scoped to one team (by key). Workflow states are fetched once per process
//! and cached; canonical state mapping goes by workflow state *type*
//! (`backlog`/`unstarted` -> Queued, `started` -> InProgress, `completed` ->
//! Done, `canceled` -> Cancelled), except that an unstarted state named
//! "Blocked" maps to Blocked and is excluded from candidates. Structured
//! blockers come from inverse `blocks` relations.

use std::cell::OnceCell;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::backend::{Backend, BackendError, Transition};
use crate::core::types::{LOWEST_URGENCY, NewWorkItem, RefStyle, WorkItem, WorkState};

const API_URL: &str = "https://api.linear.app/graphql";
/// Page bound for list queries.
const PAGE_LIMIT: u32 = 50;

const ISSUE_FIELDS: &str = "\
id identifier title description priority \
state { name type } \
inverseRelations(first: 50) { nodes { type issue { identifier } } }";

#[derive(Debug, Deserialize)]
struct LinearIssue {
    id: String,
    identifier: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    /// Linear reports priority as a float: 0 = none, 1 = urgent … 4 = low.
    #[serde(default)]
    priority: f64,
    state: LinearState,
    #[serde(default, rename = "inverseRelations")]
    inverse_relations: Option<RelationConnection>,
}

#[derive(Debug, Deserialize)]
struct LinearState {
    name: String,
    #[serde(rename = "type")]
    state_type: String,
}

#[derive(Debug, Deserialize)]
struct RelationConnection {
    nodes: Vec<Relation>,
}

#[derive(Debug, Deserialize)]
struct Relation {
    #[serde(rename = "type")]
    relation_type: String,
    issue: RelatedIssue,
}

#[derive(Debug, Deserialize)]
struct RelatedIssue {
    identifier: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WorkflowState {
    id: String,
    name: String,
    #[serde(rename = "type")]
    state_type: String,
    position: f64,
}

/// Adapter over the Linear GraphQL endpoint.
pub struct LinearBackend {
    http: reqwest::blocking::Client,
    api_key: String,
    team_key: String,
    api_url: String,
    states: OnceCell<Vec<WorkflowState>>,
    team_id: OnceCell<String>,
}

impl LinearBackend {
    pub fn new(api_key: String, team_key: String) -> Result<Self, BackendError> {
        Self::with_api_url(api_key, team_key, API_URL.to_string())
    }

    /// Point the adapter at a different endpoint (tests).
    pub fn with_api_url(
        api_key: String,
        team_key: String,
        api_url: String,
    ) -> Result<Self, BackendError> {
        if api_key.trim().is_empty() {
            return Err(BackendError::Configuration(
                "LINEAR_API_KEY must not be empty".to_string(),
            ));
        }
        if team_key.trim().is_empty() {
            return Err(BackendError::Configuration(
                "linear team key must not be empty".to_string(),
            ));
        }
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            api_key,
            team_key,
            api_url,
            states: OnceCell::new(),
            team_id: OnceCell::new(),
        })
    }

    fn graphql(&self, query: &str, variables: Value) -> Result<Value, BackendError> {
        debug!(api_url = %self.api_url, "posting graphql request");
        let response = self
            .http
            .post(&self.api_url)
            .header("Authorization", &self.api_key)
            .json(&json!({ "query": query, "variables": variables }))
            .send()?;

        let status = response.status();
        let body: Value = response.json()?;
        if !status.is_success() {
            return Err(BackendError::Api {
                status: status.as_u16(),
                message: body.to_string(),
            });
        }
        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            let message = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(BackendError::Api {
                status: status.as_u16(),
                message,
            });
        }
        body.get("data")
            .cloned()
            .ok_or_else(|| BackendError::Parse("graphql response missing data".to_string()))
    }

    fn workflow_states(&self) -> Result<&[WorkflowState], BackendError> {
        if let Some(states) = self.states.get() {
            return Ok(states);
        }
        let query = "query($team: String!) { \
            workflowStates(filter: { team: { key: { eq: $team } } }, first: 50) { \
                nodes { id name type position } } }";
        let data = self.graphql(query, json!({ "team": self.team_key }))?;
        let states: Vec<WorkflowState> =
            serde_json::from_value(data["workflowStates"]["nodes"].clone())?;
        if states.is_empty() {
            return Err(BackendError::Configuration(format!(
                "no workflow states for team {}",
                self.team_key
            )));
        }
        Ok(self.states.get_or_init(|| states))
    }

    /// Earliest state of the given type (by position).
    fn state_of_type(&self, state_type: &str) -> Result<WorkflowState, BackendError> {
        let states = self.workflow_states()?;
        states
            .iter()
            .filter(|s| s.state_type == state_type)
            .min_by(|a, b| a.position.total_cmp(&b.position))
            .cloned()
            .ok_or_else(|| {
                BackendError::Configuration(format!(
                    "team {} has no workflow state of type {state_type}",
                    self.team_key
                ))
            })
    }

    fn requeue_state(&self) -> Result<WorkflowState, BackendError> {
        self.state_of_type("unstarted")
            .or_else(|_| self.state_of_type("backlog"))
    }

    fn team_id(&self) -> Result<&str, BackendError> {
        if let Some(id) = self.team_id.get() {
            return Ok(id);
        }
        let query = "query($team: String!) { \
            teams(filter: { key: { eq: $team } }, first: 1) { nodes { id } } }";
        let data = self.graphql(query, json!({ "team": self.team_key }))?;
        let id = data["teams"]["nodes"][0]["id"]
            .as_str()
            .ok_or_else(|| {
                BackendError::Configuration(format!("unknown linear team {}", self.team_key))
            })?
            .to_string();
        Ok(self.team_id.get_or_init(|| id).as_str())
    }

    fn ensure_label(&self, name: &str) -> Result<String, BackendError> {
        let query = "query($name: String!) { \
            issueLabels(filter: { name: { eq: $name } }, first: 1) { nodes { id } } }";
        let data = self.graphql(query, json!({ "name": name }))?;
        if let Some(id) = data["issueLabels"]["nodes"][0]["id"].as_str() {
            return Ok(id.to_string());
        }
        let mutation = "mutation($name: String!, $teamId: String!) { \
            issueLabelCreate(input: { name: $name, teamId: $teamId }) { \
                issueLabel { id } } }";
        let team_id = self.team_id()?.to_string();
        let data = self.graphql(mutation, json!({ "name": name, "teamId": team_id }))?;
        data["issueLabelCreate"]["issueLabel"]["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BackendError::Parse(format!("label {name} was not created")))
    }

    fn fetch(&self, reference: &str) -> Result<Option<WorkItem>, BackendError> {
        let query = format!("query($id: String!) {{ issue(id: $id) {{ {ISSUE_FIELDS} }} }}");
        match self.graphql(&query, json!({ "id": reference })) {
            Ok(data) => {
                if data["issue"].is_null() {
                    return Ok(None);
                }
                let issue: LinearIssue = serde_json::from_value(data["issue"].clone())?;
                Ok(Some(to_work_item(&issue)))
            }
            Err(BackendError::Api { message, .. })
                if message.to_lowercase().contains("not found") =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn set_state(&self, issue_id: &str, state_id: &str) -> Result<(), BackendError> {
        let mutation = "mutation($id: String!, $stateId: String!) { \
            issueUpdate(id: $id, input: { stateId: $stateId }) { success } }";
        let data = self.graphql(mutation, json!({ "id": issue_id, "stateId": state_id }))?;
        if data["issueUpdate"]["success"].as_bool() != Some(true) {
            return Err(BackendError::Api {
                status: 200,
                message: format!("issueUpdate rejected for {issue_id}"),
            });
        }
        Ok(())
    }

    fn comment(&self, issue_id: &str, body: &str) -> Result<(), BackendError> {
        let mutation = "mutation($id: String!, $body: String!) { \
            commentCreate(input: { issueId: $id, body: $body }) { success } }";
        self.graphql(mutation, json!({ "id": issue_id, "body": body }))?;
        Ok(())
    }
}

impl Backend for LinearBackend {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn ref_style(&self) -> RefStyle {
        RefStyle::TeamPrefixed
    }

    fn list_open(&self, label: &str) -> Result<Vec<WorkItem>, BackendError> {
        let query = format!(
            "query($team: String!, $label: String!, $first: Int!) {{ \
                issues(first: $first, filter: {{ \
                    team: {{ key: {{ eq: $team }} }}, \
                    labels: {{ name: {{ eq: $label }} }}, \
                    state: {{ type: {{ nin: [\"completed\", \"canceled\"] }} }} }}) {{ \
                    nodes {{ {ISSUE_FIELDS} }} }} }}"
        );
        let data = self.graphql(
            &query,
            json!({ "team": self.team_key, "label": label, "first": PAGE_LIMIT }),
        )?;
        let issues: Vec<LinearIssue> = serde_json::from_value(data["issues"]["nodes"].clone())?;
        Ok(issues
            .iter()
            .map(to_work_item)
            .filter(|item| item.state == WorkState::Queued)
            .collect())
    }

    fn count_remaining(&self, label: &str) -> Result<usize, BackendError> {
        let query = "query($team: String!, $label: String!, $first: Int!) { \
            issues(first: $first, filter: { \
                team: { key: { eq: $team } }, \
                labels: { name: { eq: $label } }, \
                state: { type: { nin: [\"completed\", \"canceled\"] } } }) { \
                nodes { id } } }";
        let data = self.graphql(
            query,
            json!({ "team": self.team_key, "label": label, "first": PAGE_LIMIT }),
        )?;
        let nodes = data["issues"]["nodes"]
            .as_array()
            .ok_or_else(|| BackendError::Parse("issues.nodes missing".to_string()))?;
        Ok(nodes.len())
    }

    fn lookup(&self, reference: &str) -> Result<Option<WorkItem>, BackendError> {
        self.fetch(reference)
    }

    fn transition(
        &self,
        item: &WorkItem,
        target: Transition,
        note: Option<&str>,
    ) -> Result<(), BackendError> {
        let Some(current) = self.fetch(&item.display_id)? else {
            return Err(BackendError::Api {
                status: 404,
                message: format!("issue {} disappeared", item.display_id),
            });
        };

        let already_there = match target {
            Transition::InProgress => current.state == WorkState::InProgress,
            Transition::Done => current.state == WorkState::Done,
            Transition::Requeue => current.state == WorkState::Queued,
        };
        if already_there {
            debug!(item = %item.display_id, ?target, "already in target state, skipping");
            return Ok(());
        }

        let state = match target {
            Transition::InProgress => self.state_of_type("started")?,
            Transition::Done => self.state_of_type("completed")?,
            Transition::Requeue => self.requeue_state()?,
        };
        debug!(item = %item.display_id, state = %state.name, "moving to workflow state");
        self.set_state(&item.id, &state.id)?;
        if let Some(note) = note {
            self.comment(&item.id, note)?;
        }
        Ok(())
    }

    fn create(&self, draft: &NewWorkItem, label: &str) -> Result<WorkItem, BackendError> {
        let team_id = self.team_id()?.to_string();
        let mut label_ids = vec![self.ensure_label(label)?];
        for name in &draft.labels {
            label_ids.push(self.ensure_label(name)?);
        }

        let mutation = format!(
            "mutation($input: IssueCreateInput!) {{ \
                issueCreate(input: $input) {{ success issue {{ {ISSUE_FIELDS} }} }} }}"
        );
        let data = self.graphql(
            &mutation,
            json!({ "input": {
                "teamId": team_id,
                "title": draft.title,
                "description": draft.body,
                "priority": priority_to_linear(draft.priority_score),
                "labelIds": label_ids,
            }}),
        )?;
        if data["issueCreate"]["success"].as_bool() != Some(true) {
            return Err(BackendError::Api {
                status: 200,
                message: "issueCreate rejected".to_string(),
            });
        }
        let issue: LinearIssue = serde_json::from_value(data["issueCreate"]["issue"].clone())?;
        Ok(to_work_item(&issue))
    }
}

fn to_work_item(issue: &LinearIssue) -> WorkItem {
    let blocked_by = issue
        .inverse_relations
        .as_ref()
        .map(|conn| {
            conn.nodes
                .iter()
                .filter(|r| r.relation_type == "blocks")
                .map(|r| r.issue.identifier.clone())
                .collect()
        })
        .unwrap_or_default();

    WorkItem {
        id: issue.id.clone(),
        display_id: issue.identifier.clone(),
        title: issue.title.clone(),
        body: issue.description.clone().unwrap_or_default(),
        priority_score: priority_from_linear(issue.priority),
        state: map_state(&issue.state),
        blocked_by,
    }
}

fn map_state(state: &LinearState) -> WorkState {
    match state.state_type.as_str() {
        "started" => WorkState::InProgress,
        "completed" => WorkState::Done,
        "canceled" => WorkState::Cancelled,
        // A team's parked "Blocked" column is a real state, not a breadcrumb.
        _ if state.name.eq_ignore_ascii_case("blocked") => WorkState::Blocked,
        _ => WorkState::Queued,
    }
}

/// Lower score = more urgent, so "no priority" maps to lowest urgency.
fn priority_from_linear(priority: f64) -> u8 {
    if priority < 1.0 {
        LOWEST_URGENCY
    } else {
        priority.min(f64::from(LOWEST_URGENCY)) as u8
    }
}

fn priority_to_linear(score: u8) -> u8 {
    match score {
        0 => 1,
        1..=4 => score,
        _ => 0,
    }
}
