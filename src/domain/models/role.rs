//! Role configuration and problem input.
//!
//! A `RoleConfig` is created once at orchestration start and shared
//! read-only by every iteration of that role. It is never mutated.

use serde::{Deserialize, Serialize};

/// Default sentinel the evaluator emits to signal genuine convergence.
pub const DEFAULT_STOP_MARKER: &str = "<stop>";

/// How the top-level orchestration is organized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One refinement loop for a single solver role.
    #[default]
    Single,
    /// A coordinating root role that may delegate to subordinate roles.
    Coordinated,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Coordinated => "coordinated",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "single" => Some(Self::Single),
            "coordinated" | "coordinating" => Some(Self::Coordinated),
            _ => None,
        }
    }
}

/// Immutable configuration for one role in the delegation tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RoleConfig {
    /// Role name (e.g. "solver", "coordinator", a specialization).
    pub name: String,

    /// System instructions for the Generate phase of this role.
    pub instructions: String,

    /// Iteration cap for this role's refinement loop.
    pub max_iterations: u32,

    /// Whether this role may delegate subproblems to subordinates.
    pub coordinator: bool,

    /// Iteration cap applied to each subordinate this role spawns.
    /// Independent of this role's own cap.
    pub subordinate_max_iterations: u32,

    /// How many further delegation levels subordinates may open.
    /// Decremented at each level; at 0 a subordinate cannot coordinate.
    pub delegation_depth: u32,

    /// Backend model selector.
    pub model: String,

    /// Sentinel marker the evaluator uses to signal convergence.
    pub stop_marker: String,

    /// Generation token budget per completion.
    pub max_tokens: u32,

    /// Sampling temperature for the Generate phase. Evaluation always
    /// runs at 0.0 for consistency.
    pub temperature: f32,
}

impl RoleConfig {
    /// A plain single-loop solver role.
    pub fn solver(name: impl Into<String>, instructions: String, model: String) -> Self {
        Self {
            name: name.into(),
            instructions,
            max_iterations: 3,
            coordinator: false,
            subordinate_max_iterations: 3,
            delegation_depth: 0,
            model,
            stop_marker: DEFAULT_STOP_MARKER.to_string(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    /// A coordinating role that may consult subordinates.
    pub fn coordinator(name: impl Into<String>, instructions: String, model: String) -> Self {
        Self {
            coordinator: true,
            delegation_depth: 1,
            ..Self::solver(name, instructions, model)
        }
    }

    /// Derive the configuration for a subordinate of this role.
    ///
    /// The subordinate gets its own cap and one less level of delegation
    /// budget; at depth 0 it can no longer coordinate, which (together
    /// with iteration caps) bounds the recursion.
    pub fn subordinate(&self, specialization: &str, instructions: String) -> Self {
        let remaining_depth = self.delegation_depth.saturating_sub(1);
        Self {
            name: specialization.to_string(),
            instructions,
            max_iterations: self.subordinate_max_iterations,
            coordinator: remaining_depth > 0,
            subordinate_max_iterations: self.subordinate_max_iterations,
            delegation_depth: remaining_depth,
            model: self.model.clone(),
            stop_marker: self.stop_marker.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// The problem a job refines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Problem {
    /// The question or task statement.
    pub question: String,

    /// Optional supplementary context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Optional constraints or requirements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
}

impl Problem {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            context: None,
            constraints: None,
        }
    }

    /// Fold question, context, and constraints into the first prompt.
    pub fn initial_prompt(&self) -> String {
        let mut parts = vec![self.question.clone()];
        if let Some(context) = &self.context {
            parts.push(format!("\nContext: {context}"));
        }
        if let Some(constraints) = &self.constraints {
            parts.push(format!("\nConstraints: {constraints}"));
        }
        parts.join("\n")
    }
}
