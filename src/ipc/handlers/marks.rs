use crate::autosave::SaveKey;
use crate::grading::{aggregate_student, compute_subject_result};
use crate::ipc::error::{calc_err, err, ok};
use crate::ipc::flush::flush_all;
use crate::ipc::helpers::{exam_from_params, param_str, resolve_policy};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, SavePayload};
use serde_json::json;
use tracing::{info, warn};

fn handle_bulk_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let payload: SavePayload = match serde_json::from_value(req.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("invalid save payload: {}", e),
                None,
            )
        }
    };

    let resp = store::save_payload(conn, &payload);
    if !resp.success {
        warn!(student_id = %payload.student_id, error = ?resp.error, "bulk save rejected");
        return ok(&req.id, json!(resp));
    }
    info!(
        student_id = %payload.student_id,
        saved = resp.saved_count,
        errors = resp.errors.len(),
        "bulk save"
    );

    // Cells written by an explicit save no longer need their pending
    // autosave, and the session takes their stored values. Rejected cells and
    // other subjects keep their unsaved edits.
    let exam = payload.exam();
    if let Some(session) = state.session.as_mut() {
        if session.exam == exam && session.has_student(&payload.student_id) {
            for subject in &resp.saved {
                state
                    .autosave
                    .cancel(&SaveKey::new(payload.student_id.as_str(), subject.as_str()));
            }
            match store::list_marks(conn, &exam, Some(&payload.student_id)) {
                Ok(rows) => {
                    session.preload(rows.into_iter().filter(|r| resp.saved.contains(&r.subject)));
                }
                Err(e) => warn!(error = %e, "session refresh after bulk save failed"),
            }
        }
    }
    ok(&req.id, json!(resp))
}

fn handle_flush(state: &mut AppState, req: &Request) -> serde_json::Value {
    let outcome = flush_all(state);
    ok(&req.id, json!(outcome))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let exam = match exam_from_params(req) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, e),
    };
    match store::list_marks(conn, &exam, param_str(req, "studentId")) {
        Ok(rows) => ok(&req.id, json!({ "exam": exam, "marks": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_results_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = param_str(req, "studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let exam = match exam_from_params(req) {
        Ok(v) => v,
        Err(e) => return calc_err(&req.id, e),
    };
    let policy = match resolve_policy(state, req) {
        Ok(p) => p,
        Err(e) => return calc_err(&req.id, e),
    };
    let rows = match store::list_marks(conn, &exam, Some(student_id)) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if rows.is_empty() {
        return err(
            &req.id,
            "not_found",
            "no stored marks for student",
            Some(json!({ "studentId": student_id, "exam": exam })),
        );
    }

    let results = rows
        .iter()
        .map(|r| compute_subject_result(&r.to_score(), &policy))
        .collect();
    ok(&req.id, json!(aggregate_student(student_id, results, &policy)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.bulkSave" => Some(handle_bulk_save(state, req)),
        "marks.flush" => Some(handle_flush(state, req)),
        "marks.list" => Some(handle_list(state, req)),
        "results.student" => Some(handle_results_student(state, req)),
        _ => None,
    }
}
