//! Step resolution: map a last-known checkpoint to the work still to run.
//!
//! Resolution is pure and total. Anything that cannot be understood resolves
//! to the full sequence, since redoing work is always safe.

use std::fmt;

use crate::domain::{Checkpoint, StepId};

/// Ordered steps still to run for one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPlan {
    steps: Vec<StepId>,
}

impl StepPlan {
    /// Every step, from the beginning
    pub fn full() -> Self {
        Self::from_step(StepId::Ingest)
    }

    /// `first` and every step after it
    pub fn from_step(first: StepId) -> Self {
        Self {
            steps: StepId::ALL[first.index()..].to_vec(),
        }
    }

    pub fn steps(&self) -> &[StepId] {
        &self.steps
    }

    /// First step of the plan (a plan is never empty)
    pub fn first(&self) -> StepId {
        self.steps.first().copied().unwrap_or(StepId::Ingest)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether the plan starts from the beginning
    pub fn is_full(&self) -> bool {
        self.first() == StepId::Ingest
    }

    pub fn iter(&self) -> impl Iterator<Item = StepId> + '_ {
        self.steps.iter().copied()
    }
}

impl fmt::Display for StepPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.steps.iter().map(|s| s.to_string()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Resolve a checkpoint to the steps still to run.
///
/// - `Started(s)` runs `s` and everything after it
/// - `Completed(s)` runs the step after `s` onward
/// - `Completed(Persist)` and `Done` resolve to `[Persist]`; callers treat them
///   as finished before resolving
/// - `Queued`, `Error`, and a missing checkpoint run everything
pub fn resolve(checkpoint: Option<Checkpoint>) -> StepPlan {
    match checkpoint {
        None | Some(Checkpoint::Queued) | Some(Checkpoint::Error) => StepPlan::full(),
        Some(Checkpoint::Started(step)) => StepPlan::from_step(step),
        Some(Checkpoint::Completed(step)) => match step.next() {
            Some(next) => StepPlan::from_step(next),
            None => StepPlan::from_step(StepId::Persist),
        },
        Some(Checkpoint::Done) => StepPlan::from_step(StepId::Persist),
    }
}

/// Resolve a raw checkpoint string (canonical name or wire marker)
pub fn resolve_str(raw: &str) -> StepPlan {
    resolve(Checkpoint::parse(raw))
}

/// Normalize a resume point to the checkpoint the run starts from.
///
/// Done markers alias to the next step's start, progress aliases to the start
/// of enrichment, and empty or unrecognized input starts from the beginning.
/// `Done` and `Completed(Persist)` normalize to `Done`.
pub fn normalize_resume(raw: Option<&str>) -> Checkpoint {
    let parsed = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(Checkpoint::parse);

    match parsed {
        None | Some(Checkpoint::Queued) | Some(Checkpoint::Error) => Checkpoint::FIRST,
        Some(Checkpoint::Started(step)) => Checkpoint::Started(step),
        Some(Checkpoint::Completed(step)) => match step.next() {
            Some(next) => Checkpoint::Started(next),
            None => Checkpoint::Done,
        },
        Some(Checkpoint::Done) => Checkpoint::Done,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StatusMarker;

    fn all_checkpoints() -> Vec<Checkpoint> {
        let mut all = vec![Checkpoint::Queued, Checkpoint::Done, Checkpoint::Error];
        for step in StepId::ALL {
            all.push(Checkpoint::Started(step));
            all.push(Checkpoint::Completed(step));
        }
        all
    }

    #[test]
    fn test_every_checkpoint_resolves_to_ordered_nonempty_plan() {
        for checkpoint in all_checkpoints() {
            let plan = resolve(Some(checkpoint));
            assert!(!plan.is_empty(), "{checkpoint}");
            let expected = &StepId::ALL[plan.first().index()..];
            assert_eq!(plan.steps(), expected, "{checkpoint}");
        }
    }

    #[test]
    fn test_every_wire_marker_resolves() {
        for marker in StatusMarker::ALL {
            let plan = resolve_str(marker.as_str());
            assert!(!plan.is_empty(), "{marker}");
        }
    }

    #[test]
    fn test_done_marker_resolves_to_next_step() {
        let plan = resolve(Some(Checkpoint::Completed(StepId::Clean)));
        assert_eq!(
            plan.steps(),
            &[StepId::Enrich, StepId::Augment, StepId::Persist]
        );
    }

    #[test]
    fn test_appending_columns_start_resolves_to_augment_and_persist() {
        let plan = resolve_str("appending-columns-start");
        assert_eq!(plan.steps(), &[StepId::Augment, StepId::Persist]);
        assert_eq!(plan.to_string(), "[augment, persist]");
    }

    #[test]
    fn test_unrecognized_resolves_to_full_plan() {
        assert_eq!(resolve_str("garbage"), StepPlan::full());
        assert_eq!(resolve_str(""), StepPlan::full());
        assert_eq!(resolve(None), StepPlan::full());
        assert!(resolve(Some(Checkpoint::Error)).is_full());
    }

    #[test]
    fn test_normalize_resume_aliases() {
        assert_eq!(normalize_resume(None), Checkpoint::FIRST);
        assert_eq!(normalize_resume(Some("  ")), Checkpoint::FIRST);
        assert_eq!(normalize_resume(Some("added")), Checkpoint::FIRST);
        assert_eq!(
            normalize_resume(Some("sending_to_llm_progression")),
            Checkpoint::Started(StepId::Enrich)
        );
        assert_eq!(
            normalize_resume(Some("process_cleaning_done")),
            Checkpoint::Started(StepId::Enrich)
        );
        assert_eq!(
            normalize_resume(Some("reading-dataset-done")),
            Checkpoint::Started(StepId::Clean)
        );
        assert_eq!(normalize_resume(Some("saving_file_done")), Checkpoint::Done);
        assert_eq!(normalize_resume(Some("done")), Checkpoint::Done);
        assert_eq!(normalize_resume(Some("on_error")), Checkpoint::FIRST);
    }
}
