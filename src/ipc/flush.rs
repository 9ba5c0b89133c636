use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use super::types::AppState;
use crate::autosave::SaveKey;
use crate::store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushOutcome {
    pub saved: usize,
    pub failed: usize,
    pub dropped: usize,
}

/// Writes the session's current value of each key, one save per student.
/// Failures are logged only; the caller already has its computed result.
pub fn flush_keys(state: &AppState, keys: Vec<SaveKey>) -> FlushOutcome {
    let mut outcome = FlushOutcome::default();
    if keys.is_empty() {
        return outcome;
    }
    let (Some(conn), Some(session)) = (state.db.as_ref(), state.session.as_ref()) else {
        warn!(count = keys.len(), "dropping pending saves without workspace or session");
        outcome.dropped = keys.len();
        return outcome;
    };

    let mut by_student: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for k in &keys {
        by_student
            .entry(k.student_id.as_str())
            .or_default()
            .push(k.subject.as_str());
    }

    for (student_id, subjects) in by_student {
        let Some(payload) = session.save_payload(student_id, &subjects) else {
            outcome.dropped += subjects.len();
            continue;
        };
        let resp = store::save_payload(conn, &payload);
        outcome.saved += resp.saved_count;
        outcome.failed += payload.marks.len() - resp.saved_count;
        if resp.success && resp.errors.is_empty() {
            debug!(student_id, saved = resp.saved_count, "autosaved marks");
        } else {
            warn!(
                student_id,
                error = ?resp.error,
                errors = ?resp.errors,
                "autosave rejected marks"
            );
        }
    }
    outcome
}

pub fn flush_due(state: &mut AppState, now: Instant) -> FlushOutcome {
    let keys = state.autosave.take_due(now);
    flush_keys(state, keys)
}

pub fn flush_all(state: &mut AppState) -> FlushOutcome {
    if state.autosave.is_empty() {
        return FlushOutcome::default();
    }
    let keys = state.autosave.drain();
    flush_keys(state, keys)
}
