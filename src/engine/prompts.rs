//! Role prompt templates for the generate/evaluate/refine loop.

use crate::domain::models::{DelegationRecord, Problem};

pub fn solver_instructions() -> String {
    "You are an expert problem solver. Produce the best complete answer you \
     can to the task you are given. Be rigorous and concrete; show working \
     where it strengthens the answer. Output only the answer itself, with no \
     preamble about what you are about to do."
        .to_string()
}

pub fn evaluator_instructions(marker: &str) -> String {
    format!(
        "You are a strict evaluator. Review the candidate answer against the \
         original task. List every concrete deficiency: missing requirements, \
         incorrect reasoning, unhandled edge cases, unclear passages. Be \
         specific enough that each point is actionable.\n\n\
         If and only if the answer fully satisfies the task with no remaining \
         deficiencies, end your review with {marker} on its own line. Do not \
         write {marker} anywhere else, and do not write it while any issue \
         remains open."
    )
}

pub fn evaluation_prompt(problem: &Problem, artifact: &str) -> String {
    let mut prompt = format!(
        "Task:\n{}\n\nCandidate answer:\n{}\n",
        problem.question, artifact
    );
    if let Some(constraints) = &problem.constraints {
        prompt.push_str("\nConstraints the answer must satisfy:\n");
        prompt.push_str(constraints);
        prompt.push('\n');
    }
    prompt.push_str("\nReview the candidate answer.");
    prompt
}

pub fn refiner_instructions() -> String {
    "You are a prompt refiner. Given a task, a candidate answer, and an \
     evaluator's review of that answer, write an improved prompt that will \
     steer the next attempt to fix every deficiency the review raised while \
     keeping what already works. Output only the refined prompt text."
        .to_string()
}

pub fn refine_prompt(problem: &Problem, artifact: &str, feedback: &str) -> String {
    format!(
        "Task:\n{}\n\nPrevious answer:\n{}\n\nEvaluator review:\n{}\n\n\
         Write the refined prompt for the next attempt.",
        problem.question, artifact, feedback
    )
}

pub fn coordinator_instructions() -> String {
    r#"You are a coordinator. For each task, decide whether to answer it
yourself or to break it into subtasks for specialists. Reply with a single
JSON object and nothing else.

To answer directly:
{"action": "artifact", "text": "<your complete answer>"}

To delegate:
{"action": "delegate", "subordinates": [
  {"specialization": "<expert domain>", "subtask": "<self-contained task>", "context": "<optional shared context>"}
]}

Each subtask must be answerable on its own, without access to the other
subtasks or to this conversation. Delegate only when the task genuinely
decomposes; otherwise answer directly."#
        .to_string()
}

pub fn specialist_instructions(specialization: &str) -> String {
    format!(
        "You are a specialist in {specialization}. Produce the best complete \
         answer you can to the subtask you are given. Output only the answer \
         itself."
    )
}

/// Prompt for the synthesis pass after subordinates report back.
pub fn synthesis_prompt(problem: &Problem, delegations: &[DelegationRecord]) -> String {
    let mut prompt = format!(
        "Task:\n{}\n\nYour specialists have reported back:\n",
        problem.question
    );
    for record in delegations {
        prompt.push_str(&format!(
            "\n--- {} (subtask: {}) ---\n{}\n",
            record.specialization, record.subtask, record.result.artifact
        ));
    }
    prompt.push_str(
        "\nSynthesize these reports into a single complete answer to the \
         original task. Resolve any contradictions between them.",
    );
    prompt
}
