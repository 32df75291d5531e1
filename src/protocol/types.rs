//! Shared data model for agent discovery and inter-agent task exchange.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Describes a single named skill an agent advertises and can execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSkill {
    /// Unique identifier for the skill.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Description of what the skill does.
    #[serde(default)]
    pub description: Option<String>,
    /// Tags for categorization.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl AgentSkill {
    /// Build a minimal skill descriptor from a bare skill id.
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.replace('_', " "),
            id,
            description: None,
            tags: Vec::new(),
        }
    }
}

/// Capabilities advertised by an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCapabilities {
    /// Whether the agent supports streaming.
    #[serde(default)]
    pub streaming: bool,
    /// Whether the agent supports multi-turn conversations.
    #[serde(default)]
    pub multi_turn: bool,
}

/// Discovery card describing an agent's identity, address, and skills.
///
/// Created once at registration or discovery; read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    /// Agent name (unique within the registry).
    pub name: String,
    /// Agent description.
    #[serde(default)]
    pub description: String,
    /// Base URL the agent serves its dispatch endpoint on.
    pub url: String,
    /// Agent version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Agent capabilities.
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    /// Skills the agent advertises.
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    /// Default supported input content types.
    #[serde(default = "default_modes")]
    pub default_input_modes: Vec<String>,
    /// Default supported output content types.
    #[serde(default = "default_modes")]
    pub default_output_modes: Vec<String>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_modes() -> Vec<String> {
    vec!["application/json".to_string()]
}

impl AgentCard {
    /// Build a minimal card for a self-registered agent with unknown skills.
    pub fn minimal(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: "Self-registered agent".to_string(),
            url: url.into(),
            version: default_version(),
            capabilities: AgentCapabilities::default(),
            skills: Vec::new(),
            default_input_modes: default_modes(),
            default_output_modes: default_modes(),
        }
    }

    /// Whether this card advertises the given skill id.
    pub fn has_skill(&self, skill_id: &str) -> bool {
        self.skills.iter().any(|s| s.id == skill_id)
    }
}

/// Request for task execution between agents. Discarded once the response
/// is consumed; only the session event it generates survives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Unique task identifier.
    pub task_id: String,
    /// Identifier for tracing a request across multiple agents.
    pub trace_id: String,
    /// Name of the target skill.
    pub skill: String,
    /// Task parameters.
    pub parameters: HashMap<String, Value>,
}

impl TaskRequest {
    /// Create a task request with fresh task and trace ids.
    pub fn new(skill: impl Into<String>, parameters: HashMap<String, Value>) -> Self {
        Self {
            task_id: format!("task_{}", Uuid::new_v4().simple()),
            trace_id: format!("trace_{}", Uuid::new_v4().simple()),
            skill: skill.into(),
            parameters,
        }
    }

    /// Build the success response for this task, carrying its ids forward.
    pub fn completed(
        &self,
        agent_name: impl Into<String>,
        results: Value,
        execution_time_ms: i64,
    ) -> TaskResponse {
        TaskResponse {
            task_id: self.task_id.clone(),
            trace_id: self.trace_id.clone(),
            status: TaskStatus::Completed,
            agent_name: agent_name.into(),
            results: Some(results),
            error_message: None,
            execution_time_ms: Some(execution_time_ms),
            finished_at: Utc::now(),
        }
    }

    /// Build the error response for this task.
    pub fn failed(
        &self,
        agent_name: impl Into<String>,
        error_message: impl Into<String>,
        execution_time_ms: i64,
    ) -> TaskResponse {
        TaskResponse {
            task_id: self.task_id.clone(),
            trace_id: self.trace_id.clone(),
            status: TaskStatus::Error,
            agent_name: agent_name.into(),
            results: None,
            error_message: Some(error_message.into()),
            execution_time_ms: Some(execution_time_ms),
            finished_at: Utc::now(),
        }
    }
}

/// Outcome status of a task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Error,
}

/// Response from a task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Original task identifier.
    pub task_id: String,
    /// Trace identifier from the request.
    pub trace_id: String,
    /// Task status.
    pub status: TaskStatus,
    /// Name of the agent that executed the task.
    pub agent_name: String,
    /// Task result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    /// Error message if failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Execution time in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<i64>,
    /// Completion timestamp.
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_card_defaults() {
        let card = AgentCard::minimal("menu", "http://localhost:10002");
        assert_eq!(card.name, "menu");
        assert_eq!(card.version, "1.0.0");
        assert!(card.skills.is_empty());
        assert!(!card.has_skill("lookup"));
    }

    #[test]
    fn test_card_deserializes_with_partial_fields() {
        let card: AgentCard = serde_json::from_value(serde_json::json!({
            "name": "menu",
            "url": "http://localhost:10002",
            "skills": [{"id": "lookup", "name": "Lookup"}],
        }))
        .unwrap();
        assert!(card.has_skill("lookup"));
        assert_eq!(card.default_input_modes, vec!["application/json"]);
    }

    #[test]
    fn test_task_request_ids_are_unique() {
        let a = TaskRequest::new("lookup", HashMap::new());
        let b = TaskRequest::new("lookup", HashMap::new());
        assert_ne!(a.task_id, b.task_id);
        assert_ne!(a.trace_id, b.trace_id);
    }

    #[test]
    fn test_task_response_carries_request_ids() {
        let task = TaskRequest::new("lookup", HashMap::new());

        let ok = task.completed("menu", serde_json::json!({"items": 3}), 42);
        assert_eq!(ok.task_id, task.task_id);
        assert_eq!(ok.trace_id, task.trace_id);
        assert_eq!(ok.status, TaskStatus::Completed);
        assert_eq!(ok.execution_time_ms, Some(42));
        assert!(ok.error_message.is_none());

        let err = task.failed("menu", "boom", 7);
        assert_eq!(err.task_id, task.task_id);
        assert_eq!(err.status, TaskStatus::Error);
        assert_eq!(err.error_message.as_deref(), Some("boom"));
        assert!(err.results.is_none());
    }
}
