//! Iteration records and the append-only evolution history.

use serde::{Deserialize, Serialize};

/// One pass of the generate → evaluate → refine loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IterationRecord {
    /// 1-based sequence number within the engine run.
    pub sequence: u32,

    /// The prompt sent to the Generate phase.
    pub prompt: String,

    /// The generated artifact.
    pub artifact: String,

    /// The evaluator's raw free-form feedback.
    pub feedback: String,

    /// Derived convergence decision for this pass.
    pub should_stop: bool,

    /// The refined prompt produced for the next pass, if a Refine phase ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_prompt: Option<String>,
}

/// Ordered, append-only record of all iterations of one engine run.
///
/// Insertion order is significant; entries are never reordered or mutated
/// after append. The history becomes part of the immutable job result once
/// the engine terminates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvolutionHistory(Vec<IterationRecord>);

impl EvolutionHistory {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a completed iteration. Sequence numbers must arrive in order.
    pub fn push(&mut self, record: IterationRecord) {
        debug_assert_eq!(record.sequence as usize, self.0.len() + 1);
        self.0.push(record);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IterationRecord> {
        self.0.iter()
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.0.last()
    }

    /// Drop all records, keeping the count semantics for size-bounded
    /// status responses.
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl<'a> IntoIterator for &'a EvolutionHistory {
    type Item = &'a IterationRecord;
    type IntoIter = std::slice::Iter<'a, IterationRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sequence: u32) -> IterationRecord {
        IterationRecord {
            sequence,
            prompt: format!("prompt {sequence}"),
            artifact: format!("artifact {sequence}"),
            feedback: "needs work".into(),
            should_stop: false,
            refined_prompt: None,
        }
    }

    #[test]
    fn history_preserves_insertion_order() {
        let mut history = EvolutionHistory::new();
        history.push(record(1));
        history.push(record(2));
        history.push(record(3));

        let sequences: Vec<u32> = history.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(history.last().unwrap().sequence, 3);
    }
}
