//! Checkpoint Integration Tests
//!
//! Vocabulary translation and resume resolution.

use dallosh::core::{normalize_resume, resolve, resolve_str};
use dallosh::domain::{Checkpoint, StatusMarker, StepId};

#[test]
fn test_every_checkpoint_round_trips_through_its_marker() {
    let mut all = vec![Checkpoint::Queued, Checkpoint::Done, Checkpoint::Error];
    for step in StepId::ALL {
        all.push(Checkpoint::Started(step));
        all.push(Checkpoint::Completed(step));
    }

    for checkpoint in all {
        assert_eq!(checkpoint.marker().checkpoint(), Some(checkpoint));
        assert_eq!(Checkpoint::parse(&checkpoint.to_string()), Some(checkpoint));
    }
}

#[test]
fn test_lifecycle_markers_are_not_positions() {
    assert_eq!(StatusMarker::Paused.checkpoint(), None);
    assert_eq!(StatusMarker::Stopped.checkpoint(), None);
    assert_eq!(
        StatusMarker::SendingToLlmProgress.checkpoint(),
        Some(Checkpoint::Started(StepId::Enrich))
    );
    assert_eq!(StatusMarker::Added.checkpoint(), Some(Checkpoint::Queued));
}

#[test]
fn test_wire_names_are_stable() {
    assert_eq!(
        serde_json::to_string(&StatusMarker::AppendingColumns).unwrap(),
        "\"appending_collumns\""
    );
    assert_eq!(
        serde_json::to_string(&StatusMarker::SendingToLlmProgress).unwrap(),
        "\"sending_to_llm_progression\""
    );
}

#[test]
fn test_resolution_from_every_position() {
    assert!(resolve(None).is_full());
    assert!(resolve(Some(Checkpoint::Queued)).is_full());
    assert!(resolve(Some(Checkpoint::Error)).is_full());

    assert_eq!(
        resolve(Some(Checkpoint::Started(StepId::Enrich))).steps(),
        &[StepId::Enrich, StepId::Augment, StepId::Persist]
    );
    assert_eq!(
        resolve(Some(Checkpoint::Completed(StepId::Enrich))).steps(),
        &[StepId::Augment, StepId::Persist]
    );
    assert_eq!(
        resolve(Some(Checkpoint::Completed(StepId::Persist))).steps(),
        &[StepId::Persist]
    );
    assert_eq!(resolve_str("appending-columns-start").to_string(), "[augment, persist]");
    assert!(resolve_str("garbage").is_full());
}

#[test]
fn test_resume_normalization() {
    assert_eq!(normalize_resume(None), Checkpoint::FIRST);
    assert_eq!(normalize_resume(Some("")), Checkpoint::FIRST);
    assert_eq!(normalize_resume(Some("on_error")), Checkpoint::FIRST);
    assert_eq!(
        normalize_resume(Some("process_cleaning_done")),
        Checkpoint::Started(StepId::Enrich)
    );
    assert_eq!(normalize_resume(Some("saving_file_done")), Checkpoint::Done);
    assert_eq!(normalize_resume(Some("done")), Checkpoint::Done);
}

#[test]
fn test_checkpoint_serde_goes_through_the_string_codec() {
    let checkpoint: Checkpoint = serde_json::from_str("\"appending_collumns_done\"").unwrap();
    assert_eq!(checkpoint, Checkpoint::Completed(StepId::Augment));
    assert_eq!(
        serde_json::to_string(&checkpoint).unwrap(),
        format!("\"{}\"", checkpoint)
    );

    assert!(serde_json::from_str::<Checkpoint>("\"rewinding\"").is_err());
    assert_eq!(
        Checkpoint::try_from("saving-file-done".to_string()).ok(),
        Some(Checkpoint::Completed(StepId::Persist))
    );
}
