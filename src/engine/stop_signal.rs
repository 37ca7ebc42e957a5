//! Convergence detection over evaluator feedback.
//!
//! A naive substring test on the stop marker misfires whenever the evaluator
//! echoes its own guidelines ("do not include `<stop>` unless...") back into
//! the feedback. Detection is therefore two-stage: first the whole response
//! is scanned for echoed-instruction uses of the marker, and any such echo
//! marks the response non-convergent no matter where else the marker appears;
//! only an echo-free response is then tested for a genuine stop position.

use regex::Regex;

use crate::domain::errors::ProviderError;

/// Classifies evaluator feedback as a genuine stop signal or not.
#[derive(Debug, Clone)]
pub struct StopSignalDetector {
    marker: String,
    negation: Regex,
    restriction: Regex,
    adjective: Regex,
    reference: Regex,
}

impl StopSignalDetector {
    /// Build a detector for the given marker.
    ///
    /// The patterns are fixed; failure to compile them would be a programming
    /// error, surfaced as `Terminal` rather than a panic.
    pub fn new(marker: &str) -> Result<Self, ProviderError> {
        let negation = Regex::new(
            r"(?i)\b(do not|don't|never|avoid|must not|should not|not to|without|unless|instead of|refrain from)\b",
        )
        .map_err(|e| ProviderError::Terminal(format!("bad negation pattern: {e}")))?;
        let restriction = Regex::new(
            r"(?i)\b(only\s+(include|emit|output|write|use|add)|guidelines?|instructions?)\b",
        )
        .map_err(|e| ProviderError::Terminal(format!("bad restriction pattern: {e}")))?;
        let adjective = Regex::new(
            r"(?i)\b(complete|correct|satisfactory|ready|final|finished|converged|no further|no more|meets all|fully addressed)\b",
        )
        .map_err(|e| ProviderError::Terminal(format!("bad adjective pattern: {e}")))?;
        let reference = Regex::new(r"(?i)^\s*(token|marker|sentinel|signal|string|tag)\b")
            .map_err(|e| ProviderError::Terminal(format!("bad reference pattern: {e}")))?;

        Ok(Self {
            marker: marker.to_string(),
            negation,
            restriction,
            adjective,
            reference,
        })
    }

    #[must_use]
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Whether the feedback carries a genuine stop signal.
    ///
    /// An echoed-instruction occurrence anywhere in the feedback (quoted,
    /// negated, restricted, or referenced as a token) vetoes the whole
    /// response, even when another occurrence sits in a stop position. An
    /// echo-free response stops when the marker trails the response, occupies
    /// the only marker-bearing line on its own, or shares a line with a
    /// completion adjective.
    #[must_use]
    pub fn should_stop(&self, feedback: &str) -> bool {
        let occurrences: Vec<usize> = feedback
            .match_indices(&self.marker)
            .map(|(idx, _)| idx)
            .filter(|&idx| !self.is_embedded(feedback, idx))
            .collect();
        if occurrences.is_empty() {
            return false;
        }

        if occurrences.iter().any(|&idx| self.is_echoed(feedback, idx)) {
            return false;
        }

        let bearing_lines = marker_line_count(feedback, &occurrences);
        occurrences.iter().any(|&idx| {
            self.is_trailing(feedback, idx)
                || self.is_unique_sole_line(feedback, idx, bearing_lines)
                || self.line_has_completion_adjective(feedback, idx)
        })
    }

    /// Marker embedded inside a longer word is never a signal.
    fn is_embedded(&self, text: &str, idx: usize) -> bool {
        let end = idx + self.marker.len();
        prev_char(text, idx).is_some_and(char::is_alphanumeric)
            || next_char(text, end).is_some_and(char::is_alphanumeric)
    }

    /// Quoted, negated, restricted, or referenced occurrences are the
    /// evaluator talking *about* the marker, not emitting it. Patterns are
    /// matched against the occurrence's whole line, never a truncated window.
    fn is_echoed(&self, text: &str, idx: usize) -> bool {
        let end = idx + self.marker.len();
        let before = prev_char(text, idx);
        let after = next_char(text, end);
        if let (Some(b), Some(a)) = (before, after) {
            if b == a && matches!(b, '`' | '"' | '\'') {
                return true;
            }
        }

        let (line_start, line_end) = line_span(text, idx, end);
        let line_before = &text[line_start..idx];
        let line_after = &text[end..line_end];
        self.negation.is_match(line_before)
            || self.restriction.is_match(line_before)
            || self.reference.is_match(line_after)
    }

    fn is_trailing(&self, text: &str, idx: usize) -> bool {
        let end = idx + self.marker.len();
        text[end..].trim_end_matches(['.', '!', ' ', '\t', '\n', '\r']).is_empty()
    }

    /// Marker alone on its line, with no other marker-bearing line anywhere.
    fn is_unique_sole_line(&self, text: &str, idx: usize, bearing_lines: usize) -> bool {
        if bearing_lines != 1 {
            return false;
        }
        let (line_start, line_end) = line_span(text, idx, idx + self.marker.len());
        text[line_start..line_end].trim() == self.marker
    }

    fn line_has_completion_adjective(&self, text: &str, idx: usize) -> bool {
        let (line_start, line_end) = line_span(text, idx, idx + self.marker.len());
        self.adjective.is_match(&text[line_start..line_end])
    }
}

fn prev_char(text: &str, idx: usize) -> Option<char> {
    text[..idx].chars().next_back()
}

fn next_char(text: &str, idx: usize) -> Option<char> {
    text[idx..].chars().next()
}

fn line_span(text: &str, idx: usize, end: usize) -> (usize, usize) {
    let line_start = text[..idx].rfind('\n').map_or(0, |p| p + 1);
    let line_end = text[end..].find('\n').map_or(text.len(), |p| end + p);
    (line_start, line_end)
}

fn marker_line_count(text: &str, occurrences: &[usize]) -> usize {
    let mut starts: Vec<usize> = occurrences
        .iter()
        .map(|&idx| text[..idx].rfind('\n').map_or(0, |p| p + 1))
        .collect();
    starts.dedup();
    starts.len()
}
