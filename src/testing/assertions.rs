//! Custom assertions for refinement runs.

use crate::events::ProgressEvent;
use crate::refine::{AbortReason, RunOutcome, Termination};

/// Assert that exactly one terminal event was emitted and that it came last.
///
/// # Panics
///
/// Panics if there is no terminal event, more than one, or events follow it.
pub fn assert_single_terminal(events: &[ProgressEvent]) {
    let terminals: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_terminal())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(
        terminals.len(),
        1,
        "Expected exactly one terminal event, got {}.\nEvents: {:?}",
        terminals.len(),
        kinds(events)
    );
    assert_eq!(
        terminals[0],
        events.len() - 1,
        "Terminal event must be last.\nEvents: {:?}",
        kinds(events)
    );
}

/// Assert that events follow the per-iteration order:
/// `iteration_started`, `render_attempt_failed*`, `rendered`, `evaluated`,
/// then `planned` and `code_generated` or the end of the run.
///
/// # Panics
///
/// Panics with the offending position when the order is violated.
pub fn assert_event_order(events: &[ProgressEvent]) {
    // Allowed successors for each event kind
    fn allowed(prev: Option<&str>, next: &str) -> bool {
        match prev {
            None => matches!(next, "iteration_started" | "aborted"),
            Some("iteration_started") => matches!(next, "render_attempt_failed" | "rendered" | "aborted"),
            Some("render_attempt_failed") => {
                matches!(next, "render_attempt_failed" | "rendered" | "aborted")
            }
            Some("rendered") => matches!(next, "evaluated" | "aborted"),
            Some("evaluated") => {
                matches!(next, "fulfilled" | "planned" | "iteration_exhausted" | "aborted")
            }
            Some("planned") => matches!(next, "code_generated" | "aborted"),
            // Next iteration or the final verification render
            Some("code_generated") => matches!(
                next,
                "iteration_started" | "render_attempt_failed" | "rendered" | "aborted"
            ),
            Some(_) => false,
        }
    }

    let mut prev: Option<&str> = None;
    for (index, event) in events.iter().enumerate() {
        assert!(
            allowed(prev, event.kind()),
            "Unexpected '{}' after {:?} at position {}.\nEvents: {:?}",
            event.kind(),
            prev,
            index,
            kinds(events)
        );
        prev = Some(event.kind());
    }
}

/// Assert that a run aborted with `reason`.
///
/// # Panics
///
/// Panics if the run ended any other way.
pub fn assert_aborted_with(outcome: &RunOutcome, reason: AbortReason) {
    match &outcome.termination {
        Termination::Aborted { reason: actual, .. } => assert_eq!(
            *actual, reason,
            "Expected abort reason {}, got {}",
            reason, actual
        ),
        other => panic!("Expected run to abort with {}, but it ended {}", reason, other),
    }
    assert!(!outcome.fulfilled, "Aborted run must not be fulfilled");
}

fn kinds(events: &[ProgressEvent]) -> Vec<&'static str> {
    events.iter().map(ProgressEvent::kind).collect()
}
