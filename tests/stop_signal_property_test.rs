//! Property tests for stop-signal detection.

use crucible::engine::StopSignalDetector;
use proptest::prelude::*;

fn detector() -> StopSignalDetector {
    StopSignalDetector::new("<stop>").unwrap()
}

proptest! {
    /// Feedback that never mentions the marker can never stop the loop.
    #[test]
    fn absent_marker_never_stops(feedback in "[a-zA-Z0-9 .,\n]{0,400}") {
        prop_assume!(!feedback.contains("<stop>"));
        prop_assert!(!detector().should_stop(&feedback));
    }

    /// A trailing marker after neutral prose is always a genuine signal.
    /// Digits and spaces cannot collide with negation vocabulary.
    #[test]
    fn trailing_marker_after_neutral_text_stops(prefix in "[0-9 ]{0,200}") {
        let feedback = format!("{prefix}\n<stop>");
        prop_assert!(detector().should_stop(&feedback));
    }

    /// A marker embedded inside a word is never a signal, wherever it sits.
    #[test]
    fn embedded_marker_never_stops(
        before in "[a-z]{1,10}",
        after in "[a-z]{1,10}",
        padding in "[0-9 ]{0,100}",
    ) {
        let feedback = format!("{padding}{before}<stop>{after}");
        prop_assert!(!detector().should_stop(&feedback));
    }

    /// Backtick-quoted markers are the evaluator quoting its instructions.
    #[test]
    fn quoted_marker_never_stops(padding in "[0-9 ]{0,100}") {
        let feedback = format!("{padding} the `<stop>` guideline {padding}");
        prop_assert!(!detector().should_stop(&feedback));
    }

    /// An echoed guideline anywhere vetoes the response outright, even when
    /// another marker occurrence sits in a perfect stop position.
    #[test]
    fn echoed_guideline_vetoes_any_later_marker(filler in "[0-9 ]{0,120}") {
        let feedback = format!("Only include <stop> for finished work.\n{filler}\n<stop>");
        prop_assert!(!detector().should_stop(&feedback));
    }

    /// Detection is insensitive to trailing whitespace and punctuation.
    #[test]
    fn trailing_decoration_does_not_hide_the_signal(tail in "[.! \t\n]{0,10}") {
        let feedback = format!("123 456\n<stop>{tail}");
        prop_assert!(detector().should_stop(&feedback));
    }
}
